//! Ingestion orchestrator.
//!
//! Streams JSON-lines records once and writes the durable-tier flat files:
//!
//! - `<durable>.txt`: `anchor\tkey\tunique-field-1\t...` per retained record
//! - `<field>.txt`: `anchor\tvalue` per value of each non-unique field
//!
//! Malformed records and records without a key are logged and skipped.
//! Secondary imports only join onto existing anchors; unknown keys are
//! skipped silently. A document is written once per set: records whose
//! anchor is already loaded, or appeared earlier in the pass, are skipped
//! along with their list values.

use crate::anchor::AnchorStore;
use crate::descriptor::FieldDescriptor;
use crate::error::Result;
use folio_common::AnchorId;
use folio_config::TableSet;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Render a scalar the way it is written to flat files. Non-scalars become
/// compact JSON.
pub fn render_value(value: &Json) -> String {
    match value {
        Json::Null => String::new(),
        Json::String(s) => s.clone(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Flat-file cell: tabs and line breaks would split the record.
fn cell(value: &Json) -> String {
    render_value(value).replace(['\t', '\n', '\r'], " ")
}

/// Counters for one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Non-blank input lines read.
    pub read: u64,
    /// Records written to the durable main file.
    pub retained: u64,
    /// Lines that were not JSON objects.
    pub malformed: u64,
    /// Records without the key field.
    pub missing_key: u64,
    /// Secondary-import records whose key has no anchor.
    pub unknown_anchor: u64,
    /// Records whose anchor was already loaded into the set.
    pub already_loaded: u64,
    /// Anchors minted during this pass.
    pub minted: u64,
    /// Rows written per non-unique field.
    pub satellite_rows: BTreeMap<String, u64>,
    /// Input remained when the row limit was hit.
    pub limit_reached: bool,
}

impl IngestReport {
    pub fn skipped(&self) -> u64 {
        self.malformed + self.missing_key + self.unknown_anchor + self.already_loaded
    }
}

/// Paths of the flat files one pass produced.
#[derive(Debug, Clone)]
pub struct FlatFiles {
    pub main: PathBuf,
    /// Non-unique field name → satellite file.
    pub satellites: BTreeMap<String, PathBuf>,
}

/// One ingestion pass over a record stream.
pub struct Ingestor<'a> {
    set: &'a TableSet,
    key_field: &'a str,
    fields: &'a [FieldDescriptor],
    row_limit: Option<u64>,
    /// Anchors with a row in the set's main table before this pass.
    loaded: Option<&'a HashSet<AnchorId>>,
    out_dir: PathBuf,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        set: &'a TableSet,
        key_field: &'a str,
        fields: &'a [FieldDescriptor],
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            set,
            key_field,
            fields,
            row_limit: None,
            loaded: None,
            out_dir: out_dir.into(),
        }
    }

    pub fn with_row_limit(mut self, limit: Option<u64>) -> Self {
        self.row_limit = limit;
        self
    }

    pub fn with_loaded(mut self, loaded: &'a HashSet<AnchorId>) -> Self {
        self.loaded = Some(loaded);
        self
    }

    /// Flat-file locations for this pass.
    pub fn flat_files(&self) -> FlatFiles {
        FlatFiles {
            main: self.out_dir.join(format!("{}.txt", self.set.durable)),
            satellites: self
                .fields
                .iter()
                .filter(|f| !f.unique())
                .map(|f| {
                    (
                        f.field().to_string(),
                        self.out_dir.join(format!("{}.txt", f.field())),
                    )
                })
                .collect(),
        }
    }

    /// Stream `input`, resolving keys through `anchors`.
    ///
    /// Anchors minted during the pass are committed only if the pass
    /// completes; an I/O failure leaves the anchor store unchanged.
    pub fn run<R: BufRead>(&self, input: R, anchors: &mut AnchorStore) -> Result<(IngestReport, FlatFiles)> {
        fs::create_dir_all(&self.out_dir)?;
        let files = self.flat_files();
        let mut main = BufWriter::new(File::create(&files.main)?);
        let mut satellites: BTreeMap<String, BufWriter<File>> = BTreeMap::new();
        for (field, path) in &files.satellites {
            satellites.insert(field.clone(), BufWriter::new(File::create(path)?));
        }

        let unique: Vec<&FieldDescriptor> = self.fields.iter().filter(|f| f.unique()).collect();
        let multi: Vec<&FieldDescriptor> = self.fields.iter().filter(|f| !f.unique()).collect();
        let mut report = IngestReport::default();
        let mut seen: HashSet<AnchorId> = HashSet::new();
        let mut batch = anchors.batch()?;

        for (idx, line) in input.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if self.row_limit.is_some_and(|limit| report.retained >= limit) {
                report.limit_reached = true;
                break;
            }
            report.read += 1;

            let record: Map<String, Json> = match serde_json::from_str(&line) {
                Ok(Json::Object(record)) => record,
                Ok(_) => {
                    warn!(line = idx + 1, "record is not a JSON object, skipped");
                    report.malformed += 1;
                    continue;
                }
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "malformed record skipped");
                    report.malformed += 1;
                    continue;
                }
            };

            let key = match record.get(self.key_field) {
                Some(v) if !v.is_null() => cell(v),
                _ => {
                    warn!(line = idx + 1, key_field = self.key_field, "record has no key, skipped");
                    report.missing_key += 1;
                    continue;
                }
            };

            let anchor: AnchorId = if self.set.primary {
                batch.resolve_or_mint(&key)?
            } else {
                match batch.lookup(&key)? {
                    Some(anchor) => anchor,
                    None => {
                        debug!(key = %key, "no anchor for key, skipped");
                        report.unknown_anchor += 1;
                        continue;
                    }
                }
            };

            if self.loaded.is_some_and(|loaded| loaded.contains(&anchor)) || !seen.insert(anchor) {
                debug!(line = idx + 1, key = %key, anchor = %anchor, "document already loaded, skipped");
                report.already_loaded += 1;
                continue;
            }

            let mut row = Vec::with_capacity(unique.len() + 2);
            row.push(anchor.to_string());
            row.push(key);
            for field in &unique {
                row.push(record.get(field.field()).map(cell).unwrap_or_default());
            }
            writeln!(main, "{}", row.join("\t"))?;

            for field in &multi {
                let values: Vec<&Json> = match record.get(field.field()) {
                    None | Some(Json::Null) => continue,
                    Some(Json::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
                    Some(scalar) => vec![scalar],
                };
                let Some(out) = satellites.get_mut(field.field()) else {
                    continue;
                };
                for value in &values {
                    writeln!(out, "{anchor}\t{}", cell(value))?;
                }
                *report
                    .satellite_rows
                    .entry(field.field().to_string())
                    .or_insert(0) += values.len() as u64;
            }
            report.retained += 1;
        }

        main.flush()?;
        for out in satellites.values_mut() {
            out.flush()?;
        }
        report.minted = batch.commit()?;
        if report.already_loaded > 0 {
            warn!(
                table = %self.set.durable,
                records = report.already_loaded,
                "records for already-loaded documents skipped"
            );
        }
        info!(
            table = %self.set.durable,
            read = report.read,
            retained = report.retained,
            skipped = report.skipped(),
            minted = report.minted,
            limit_reached = report.limit_reached,
            "ingestion pass complete"
        );
        Ok((report, files))
    }
}

/// Convenience for callers holding a path.
pub fn open_input(path: &Path) -> Result<std::io::BufReader<File>> {
    let file = File::open(path).map_err(|e| crate::error::CompileError::Input {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(std::io::BufReader::new(file))
}
