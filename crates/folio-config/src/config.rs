//! Compiler configuration.
//!
//! One explicit struct passed into the compiler at construction. Every
//! heuristic constant lives here so deployments can tune it without code
//! changes.

use folio_common::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How durable tables are populated on each compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Drop and recreate durable tables before loading.
    Replace,
    /// Append onto existing durable tables; duplicate anchors are skipped.
    #[default]
    Append,
}

/// Tunable settings for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    pub schema_version: String,

    /// Document-identifier column every durable table keys on.
    pub anchor_field: String,
    /// External document key resolved to anchors (e.g. a filename).
    pub key_field: String,
    /// Storage width in bits of anchor columns.
    pub anchor_width: u32,

    /// Durable table of the primary table set.
    pub main_table: String,
    /// Volatile heap of the primary table set.
    pub main_heap: String,

    /// Mean multiplicity above which a field is categorical.
    pub categorical_threshold: f64,
    /// Dictionary entries must occur more often than this to be exported.
    pub export_min_count: u64,
    /// Maximum dictionary entries exported per categorical field.
    pub export_max_entries: usize,
    /// Records sampled for type inference.
    pub sample_limit: usize,

    pub text_max_len: u32,
    pub categorical_max_len: u32,

    /// Stop ingesting after this many retained records.
    pub row_limit: Option<u64>,
    /// Worker threads for per-field dictionary and volatile builds.
    pub parallel_builds: usize,
    pub load_mode: LoadMode,

    /// Flat files, anchor store and store snapshot live here.
    pub data_dir: PathBuf,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            anchor_field: "bookid".to_string(),
            key_field: "filename".to_string(),
            anchor_width: 24,
            main_table: "catalog".to_string(),
            main_heap: "fastcat".to_string(),
            categorical_threshold: 2.0,
            export_min_count: 20,
            export_max_entries: 500,
            sample_limit: 30_000,
            text_max_len: 5000,
            categorical_max_len: 255,
            row_limit: None,
            parallel_builds: 1,
            load_mode: LoadMode::default(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("folio"))
        .unwrap_or_else(|| PathBuf::from(".folio"))
}

impl CompilerConfig {
    /// Names no field definition may use.
    pub fn reserved_names(&self) -> Vec<&str> {
        vec![self.anchor_field.as_str(), self.key_field.as_str()]
    }

    /// The table set for an import. `None` targets the primary set.
    pub fn table_set(&self, secondary: Option<&str>) -> TableSet {
        match secondary {
            None => TableSet {
                durable: self.main_table.clone(),
                heap: self.main_heap.clone(),
                primary: true,
            },
            Some(name) => TableSet {
                durable: name.to_string(),
                heap: format!("{name}heap"),
                primary: false,
            },
        }
    }

    pub fn anchor_store_path(&self) -> PathBuf {
        self.data_dir.join("anchors.sqlite")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }

    /// Directory for per-field flat files.
    pub fn flat_dir(&self) -> PathBuf {
        self.data_dir.join("texts")
    }
}

/// Durable table and volatile heap an import writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSet {
    pub durable: String,
    pub heap: String,
    /// Only the primary set mints anchors; secondary sets join onto them.
    pub primary: bool,
}
