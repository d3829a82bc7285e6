//! Field definitions: the closed set of semantic datatypes a metadata field
//! can take, and the validated definition a descriptor is built from.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Suffixes the compiler appends to field names for derived columns and
/// tables. A field ending in one of these would shadow a derived name.
pub const RESERVED_SUFFIXES: &[&str] = &["__id", "__count", "_disk", "_lookup", "_heap", "__tmp"];

/// Semantic datatype of a metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Unconstrained text. Durable tier only; never exported as a facet.
    Text,
    /// Bounded, repeating value space. Dictionary-encoded.
    Categorical,
    /// Numeric time (years, days, epoch seconds).
    Time,
    /// Plain integer.
    Integer,
    /// Fixed-point decimal.
    Decimal,
    /// Anything else. Durable tier only.
    #[serde(rename = "etc", alias = "other")]
    Other,
}

impl FieldKind {
    /// Storage class the durable tier uses for this datatype.
    pub fn storage(self) -> StorageKind {
        match self {
            FieldKind::Text | FieldKind::Other => StorageKind::Text,
            FieldKind::Categorical => StorageKind::Character,
            FieldKind::Time | FieldKind::Integer => StorageKind::Integer,
            FieldKind::Decimal => StorageKind::Decimal,
        }
    }

    /// Whether the field gets a column in the volatile tier.
    pub fn is_volatile(self) -> bool {
        !matches!(self, FieldKind::Text | FieldKind::Other)
    }

    /// Visibility recorded in the field metadata table.
    pub fn status(self) -> &'static str {
        match self {
            FieldKind::Categorical | FieldKind::Time => "public",
            _ => "hidden",
        }
    }

    /// Name used in exported descriptors and registry records.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Categorical => "categorical",
            FieldKind::Time => "time",
            FieldKind::Integer => "integer",
            FieldKind::Decimal => "decimal",
            FieldKind::Other => "etc",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical storage class of a durable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Long bounded string.
    Text,
    /// Short bounded string (dictionary source).
    Character,
    Integer,
    Decimal,
}

/// A field definition, either supplied explicitly or produced by inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    /// Column name of the field in the input records.
    pub field: String,

    /// Semantic datatype.
    pub datatype: FieldKind,

    /// Whether the field takes exactly one value per document.
    #[serde(default = "default_unique")]
    pub unique: bool,

    /// Human-readable display name (defaults to `field`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Free-text description stored in the field metadata table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_unique() -> bool {
    true
}

impl FieldDefinition {
    pub fn new(field: impl Into<String>, datatype: FieldKind, unique: bool) -> Self {
        Self {
            field: field.into(),
            datatype,
            unique,
            name: None,
            description: None,
        }
    }

    /// Display name, falling back to the field name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.field)
    }

    /// Validate the field name against the reserved names of the deployment
    /// (anchor field, key field) and the derived-name suffixes.
    ///
    /// Field names end up as identifiers in every store dialect, so only
    /// `[A-Za-z0-9_]` is accepted.
    pub fn validate(&self, reserved: &[&str]) -> Result<()> {
        if self.field.is_empty() {
            return Err(Error::EmptyFieldName);
        }
        if !self
            .field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::InvalidFieldName {
                field: self.field.clone(),
            });
        }
        if let Some(hit) = reserved
            .iter()
            .find(|r| r.eq_ignore_ascii_case(&self.field))
        {
            return Err(Error::ReservedFieldName {
                field: self.field.clone(),
                reserved: (*hit).to_string(),
            });
        }
        if let Some(suffix) = RESERVED_SUFFIXES.iter().find(|s| self.field.ends_with(*s)) {
            return Err(Error::ReservedFieldName {
                field: self.field.clone(),
                reserved: format!("*{suffix}"),
            });
        }
        Ok(())
    }
}

/// Validate a whole schema: every definition individually, then uniqueness
/// of field names across the set.
pub fn validate_definitions(defs: &[FieldDefinition], reserved: &[&str]) -> Result<()> {
    let mut seen = HashSet::new();
    for def in defs {
        def.validate(reserved)?;
        if !seen.insert(def.field.to_ascii_lowercase()) {
            return Err(Error::DuplicateField(def.field.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_mapping() {
        assert_eq!(FieldKind::Categorical.storage(), StorageKind::Character);
        assert_eq!(FieldKind::Time.storage(), StorageKind::Integer);
        assert_eq!(FieldKind::Other.storage(), StorageKind::Text);
        assert!(!FieldKind::Text.is_volatile());
        assert!(FieldKind::Decimal.is_volatile());
    }

    #[test]
    fn test_definition_parse_defaults_unique() {
        let def: FieldDefinition =
            serde_json::from_str(r#"{"field":"genre","datatype":"categorical"}"#).unwrap();
        assert!(def.unique);
        assert_eq!(def.display_name(), "genre");
    }

    #[test]
    fn test_definition_accepts_legacy_other_names() {
        let def: FieldDefinition =
            serde_json::from_str(r#"{"field":"x","datatype":"etc","unique":false}"#).unwrap();
        assert_eq!(def.datatype, FieldKind::Other);
        let def: FieldDefinition =
            serde_json::from_str(r#"{"field":"x","datatype":"other"}"#).unwrap();
        assert_eq!(def.datatype, FieldKind::Other);
    }

    #[test]
    fn test_definition_rejects_unknown_keys() {
        let err = serde_json::from_str::<FieldDefinition>(
            r#"{"field":"genre","datatype":"categorical","color":"red"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let def = FieldDefinition::new("BookID", FieldKind::Integer, true);
        assert!(matches!(
            def.validate(&["bookid", "filename"]),
            Err(Error::ReservedFieldName { .. })
        ));

        let def = FieldDefinition::new("genre__id", FieldKind::Integer, true);
        assert!(matches!(
            def.validate(&["bookid"]),
            Err(Error::ReservedFieldName { .. })
        ));
    }

    #[test]
    fn test_invalid_characters_rejected() {
        let def = FieldDefinition::new("genre; DROP TABLE catalog", FieldKind::Text, true);
        assert!(matches!(
            def.validate(&[]),
            Err(Error::InvalidFieldName { .. })
        ));
        assert!(matches!(
            FieldDefinition::new("", FieldKind::Text, true).validate(&[]),
            Err(Error::EmptyFieldName)
        ));
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let defs = vec![
            FieldDefinition::new("genre", FieldKind::Categorical, true),
            FieldDefinition::new("Genre", FieldKind::Text, true),
        ];
        assert!(matches!(
            validate_definitions(&defs, &["bookid"]),
            Err(Error::DuplicateField(_))
        ));
    }
}
