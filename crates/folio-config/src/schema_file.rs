//! Explicit field-schema files.
//!
//! A schema file is a JSON array of field definitions in column order:
//!
//! ```json
//! [
//!   {"field": "title", "datatype": "text"},
//!   {"field": "genre", "datatype": "categorical", "unique": false},
//!   {"field": "year", "datatype": "time", "name": "Publication year"}
//! ]
//! ```

use crate::config::CompilerConfig;
use crate::validate::{ValidationError, ValidationResult};
use folio_common::field::validate_definitions;
use folio_common::FieldDefinition;
use std::path::Path;
use tracing::debug;

/// Parse and validate a schema document.
pub fn parse_field_schema(json: &str, cfg: &CompilerConfig) -> ValidationResult<Vec<FieldDefinition>> {
    let defs: Vec<FieldDefinition> = serde_json::from_str(json)
        .map_err(|e| ValidationError::ParseError(format!("invalid field schema: {e}")))?;
    validate_definitions(&defs, &cfg.reserved_names())?;
    Ok(defs)
}

/// Load and validate a schema file.
pub fn load_field_schema(path: &Path, cfg: &CompilerConfig) -> ValidationResult<Vec<FieldDefinition>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ValidationError::IoError(format!("failed to read {}: {}", path.display(), e))
    })?;
    let defs = parse_field_schema(&content, cfg)?;
    debug!(path = %path.display(), fields = defs.len(), "field schema loaded");
    Ok(defs)
}
