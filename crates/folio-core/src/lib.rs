//! Folio catalog compiler library.
//!
//! Compiles JSON-lines document metadata into a durable, fully detailed tier
//! and a volatile, dictionary-encoded tier that can be rebuilt from a
//! registry of procedures after any restart.

pub mod anchor;
pub mod compile;
pub mod descriptor;
pub mod dictionary;
pub mod error;
pub mod exit_codes;
pub mod export;
pub mod infer;
pub mod ingest;
pub mod logging;
pub mod registry;

pub use anchor::{AnchorBatch, AnchorError, AnchorStore};
pub use compile::{CompileReport, CompileRequest, Compiler};
pub use descriptor::{FieldDescriptor, FieldRecord};
pub use dictionary::{DictionaryEntry, IdWidth};
pub use error::{CompileError, Result};
pub use exit_codes::ExitCode;
pub use export::{export_ui_components, UiDescriptor, UiOptions};
pub use infer::{infer_field, Sampler};
pub use ingest::{IngestReport, Ingestor};
pub use registry::{RehydrateReport, Registry};
