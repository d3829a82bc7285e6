//! Shared helpers for folio-core integration tests.
//!
//! `EventCapture` records every tracing event emitted on the current thread
//! so tests can assert on warnings without parsing log output.

#![allow(dead_code)]

use folio_common::FieldDefinition;
use folio_config::CompilerConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// A recorded event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Shared storage for captured events.
#[derive(Debug, Clone, Default)]
pub struct EventStore(Arc<Mutex<Vec<CapturedEvent>>>);

impl EventStore {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().clone()
    }

    /// Events at WARN level.
    pub fn warnings(&self) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == Level::WARN)
            .collect()
    }

    /// Warnings whose message contains `needle`.
    pub fn warnings_containing(&self, needle: &str) -> Vec<CapturedEvent> {
        self.warnings()
            .into_iter()
            .filter(|e| e.message.contains(needle))
            .collect()
    }
}

struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }
}

/// Layer that pushes every event into an [`EventStore`].
pub struct EventCaptureLayer {
    store: EventStore,
}

impl<S: Subscriber> Layer<S> for EventCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor {
            message: String::new(),
            fields: HashMap::new(),
        };
        event.record(&mut visitor);
        self.store.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Capture events on this thread until the guard drops.
pub fn capture_events() -> (EventStore, tracing::subscriber::DefaultGuard) {
    let store = EventStore::default();
    let subscriber = tracing_subscriber::registry().with(EventCaptureLayer {
        store: store.clone(),
    });
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}

/// A scratch workspace: config rooted in a temp dir plus helpers to write
/// input files into it.
pub struct Workspace {
    pub dir: TempDir,
    pub cfg: CompilerConfig,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cfg = CompilerConfig {
            data_dir: dir.path().join("data"),
            ..CompilerConfig::default()
        };
        Self { dir, cfg }
    }

    /// Write JSON-lines input under `name`.
    pub fn input(&self, name: &str, lines: &[&str]) -> PathBuf {
        let path = self.dir.path().join(name);
        let mut contents = lines.join("\n");
        contents.push('\n');
        std::fs::write(&path, contents).unwrap();
        path
    }
}

pub fn categorical(field: &str, unique: bool) -> FieldDefinition {
    FieldDefinition::new(field, folio_common::FieldKind::Categorical, unique)
}
