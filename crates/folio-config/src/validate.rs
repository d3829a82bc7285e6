//! Configuration validation.

use crate::config::CompilerConfig;
use folio_common::schema::is_compatible;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("incompatible schema version {found}, expected {expected}")]
    SchemaVersion { found: String, expected: String },

    #[error("invalid value for {field}: {reason}")]
    SemanticError { field: &'static str, reason: String },

    #[error(transparent)]
    Field(#[from] folio_common::Error),
}

impl ValidationError {
    /// Stable error code, in the configuration decade unless the cause is a
    /// field-definition error.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 10,
            ValidationError::ParseError(_) => 11,
            ValidationError::SchemaVersion { .. } => 12,
            ValidationError::SemanticError { .. } => 13,
            ValidationError::Field(e) => e.code(),
        }
    }
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

fn semantic(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::SemanticError {
        field,
        reason: reason.into(),
    }
}

/// Check a configuration for values the compiler cannot work with.
pub fn validate_config(cfg: &CompilerConfig) -> ValidationResult<()> {
    if !is_compatible(&cfg.schema_version) {
        return Err(ValidationError::SchemaVersion {
            found: cfg.schema_version.clone(),
            expected: folio_common::SCHEMA_VERSION.to_string(),
        });
    }

    // Names end up as table and column identifiers.
    let names: [(&'static str, &str); 4] = [
        ("anchor_field", &cfg.anchor_field),
        ("key_field", &cfg.key_field),
        ("main_table", &cfg.main_table),
        ("main_heap", &cfg.main_heap),
    ];
    for (field, value) in names {
        if value.is_empty() {
            return Err(semantic(field, "must not be empty"));
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(semantic(field, format!("'{value}' is not a plain identifier")));
        }
    }
    if cfg.anchor_field.eq_ignore_ascii_case(&cfg.key_field) {
        return Err(semantic("key_field", "must differ from anchor_field"));
    }
    if cfg.main_table == cfg.main_heap {
        return Err(semantic("main_heap", "must differ from main_table"));
    }

    if !matches!(cfg.anchor_width, 8 | 16 | 24 | 32) {
        return Err(folio_common::Error::UnsupportedWidth(cfg.anchor_width).into());
    }
    if !(cfg.categorical_threshold.is_finite() && cfg.categorical_threshold > 0.0) {
        return Err(semantic(
            "categorical_threshold",
            format!("must be positive, got {}", cfg.categorical_threshold),
        ));
    }
    if cfg.export_max_entries == 0 {
        return Err(semantic("export_max_entries", "must be positive"));
    }
    if cfg.sample_limit == 0 {
        return Err(semantic("sample_limit", "must be positive"));
    }
    if cfg.categorical_max_len == 0 || cfg.text_max_len == 0 {
        return Err(semantic("text_max_len", "column lengths must be positive"));
    }
    if cfg.categorical_max_len > cfg.text_max_len {
        return Err(semantic(
            "categorical_max_len",
            format!(
                "{} exceeds text_max_len {}",
                cfg.categorical_max_len, cfg.text_max_len
            ),
        ));
    }
    if cfg.parallel_builds == 0 {
        return Err(semantic("parallel_builds", "must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        validate_config(&CompilerConfig::default()).unwrap();
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let cfg = CompilerConfig {
            categorical_threshold: 0.0,
            ..CompilerConfig::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert_eq!(err.code(), 13);
    }

    #[test]
    fn test_rejects_odd_anchor_width() {
        let cfg = CompilerConfig {
            anchor_width: 12,
            ..CompilerConfig::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Field(folio_common::Error::UnsupportedWidth(12))
        ));
    }

    #[test]
    fn test_rejects_colliding_names() {
        let cfg = CompilerConfig {
            key_field: "BookId".into(),
            ..CompilerConfig::default()
        };
        assert!(validate_config(&cfg).is_err());

        let cfg = CompilerConfig {
            main_table: "bad name".into(),
            ..CompilerConfig::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_rejects_inverted_lengths() {
        let cfg = CompilerConfig {
            categorical_max_len: 6000,
            ..CompilerConfig::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_rejects_incompatible_version() {
        let cfg = CompilerConfig {
            schema_version: "2.0.0".into(),
            ..CompilerConfig::default()
        };
        assert!(matches!(
            validate_config(&cfg),
            Err(ValidationError::SchemaVersion { .. })
        ));
    }
}
