//! Typed table definitions.
//!
//! Backends render these into their own DDL; the compiler never builds
//! schema strings itself.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Where a table lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Disk-backed, survives restarts.
    Durable,
    /// Memory-resident, contents lost on restart.
    Volatile,
}

/// Column storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint24")]
    UInt24,
    #[serde(rename = "uint32")]
    UInt32,
    /// Signed 32-bit integer.
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "decimal")]
    Decimal { precision: u8, scale: u8 },
    /// Bounded string, length in characters.
    #[serde(rename = "varchar")]
    Varchar(u32),
}

/// Outcome of coercing a raw value into a column type.
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub value: Value,
    /// The stored value differs from the input (truncated, clamped, or
    /// replaced by a default).
    pub lossy: bool,
}

impl Coerced {
    fn exact(value: Value) -> Self {
        Self { value, lossy: false }
    }

    fn lossy(value: Value) -> Self {
        Self { value, lossy: true }
    }
}

impl ColumnType {
    /// Largest value an unsigned integer column can hold.
    pub fn max_unsigned(self) -> Option<u64> {
        match self {
            ColumnType::UInt8 => Some(u64::from(u8::MAX)),
            ColumnType::UInt16 => Some(u64::from(u16::MAX)),
            ColumnType::UInt24 => Some(0xFF_FFFF),
            ColumnType::UInt32 => Some(u64::from(u32::MAX)),
            _ => None,
        }
    }

    pub fn is_text(self) -> bool {
        matches!(self, ColumnType::Varchar(_))
    }

    /// Coerce a raw field from a tabular source.
    ///
    /// Follows the permissive semantics of bulk loaders: unparseable numbers
    /// become 0, out-of-range numbers clamp, long strings truncate. Every such
    /// substitution is flagged `lossy` so the caller can log it.
    pub fn coerce_str(self, raw: &str) -> Coerced {
        match self {
            ColumnType::Varchar(max) => truncate(raw, max),
            ColumnType::Decimal { precision, scale } => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => fit_decimal(v, precision, scale),
                _ => Coerced::lossy(Value::Float(0.0)),
            },
            _ => {
                let trimmed = raw.trim();
                if let Ok(v) = trimmed.parse::<i64>() {
                    return self.clamp_int(v);
                }
                match trimmed.parse::<f64>() {
                    Ok(v) if v.is_finite() => {
                        let mut out = self.clamp_int(v.round() as i64);
                        out.lossy |= v.fract() != 0.0;
                        out
                    }
                    _ => Coerced::lossy(Value::Int(0)),
                }
            }
        }
    }

    /// Coerce a value produced by another statement.
    pub fn coerce(self, value: &Value) -> Coerced {
        match (self, value) {
            (_, Value::Null) => Coerced::exact(Value::Null),
            (ColumnType::Varchar(max), Value::Text(s)) => truncate(s, max),
            (ColumnType::Varchar(max), other) => truncate(&other.to_string(), max),
            (ColumnType::Decimal { precision, scale }, other) => match other.as_f64() {
                Some(v) if v.is_finite() => fit_decimal(v, precision, scale),
                _ => Coerced::lossy(Value::Float(0.0)),
            },
            (_, Value::Int(v)) => self.clamp_int(*v),
            (_, Value::Float(v)) => {
                let mut out = self.clamp_int(v.round() as i64);
                out.lossy |= v.fract() != 0.0;
                out
            }
            (_, Value::Text(s)) => self.coerce_str(s),
        }
    }

    fn clamp_int(self, v: i64) -> Coerced {
        let (lo, hi) = match self.max_unsigned() {
            Some(max) => (0i64, max as i64),
            None => (i64::from(i32::MIN), i64::from(i32::MAX)),
        };
        if v < lo {
            Coerced::lossy(Value::Int(lo))
        } else if v > hi {
            Coerced::lossy(Value::Int(hi))
        } else {
            Coerced::exact(Value::Int(v))
        }
    }
}

fn truncate(s: &str, max: u32) -> Coerced {
    let max = max as usize;
    match s.char_indices().nth(max) {
        Some((cut, _)) => Coerced::lossy(Value::Text(s[..cut].to_string())),
        None => Coerced::exact(Value::Text(s.to_string())),
    }
}

fn fit_decimal(v: f64, precision: u8, scale: u8) -> Coerced {
    let factor = 10f64.powi(i32::from(scale));
    let rounded = (v * factor).round() / factor;
    let limit = 10f64.powi(i32::from(precision) - i32::from(scale)) - 1.0 / factor;
    let clamped = rounded.clamp(-limit, limit);
    Coerced {
        value: Value::Float(clamped),
        lossy: clamped != v,
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub columns: Vec<String>,
    /// Key prefix length for long string columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_len: Option<u32>,
}

impl IndexSpec {
    pub fn on<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            prefix_len: None,
        }
    }
}

/// Full table definition handed to `define_table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    pub engine: Engine,
}

impl TableDef {
    pub fn new(name: impl Into<String>, engine: Engine) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            engine,
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Position of the primary-key column, if any.
    pub fn primary_key(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }

    /// Same definition under another name (used for build-then-rename).
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varchar_truncates_on_char_boundary() {
        let out = ColumnType::Varchar(3).coerce_str("héllo");
        assert_eq!(out.value, Value::text("hél"));
        assert!(out.lossy);
        assert!(!ColumnType::Varchar(5).coerce_str("héllo").lossy);
    }

    #[test]
    fn test_unsigned_clamps_and_defaults() {
        assert_eq!(ColumnType::UInt8.coerce_str("300").value, Value::Int(255));
        assert_eq!(ColumnType::UInt8.coerce_str("-4").value, Value::Int(0));
        let empty = ColumnType::UInt24.coerce_str("");
        assert_eq!(empty.value, Value::Int(0));
        assert!(empty.lossy);
        let exact = ColumnType::Int.coerce_str(" 1850 ");
        assert_eq!(exact.value, Value::Int(1850));
        assert!(!exact.lossy);
    }

    #[test]
    fn test_decimal_rounds_to_scale() {
        let ty = ColumnType::Decimal {
            precision: 9,
            scale: 4,
        };
        let out = ty.coerce_str("3.14159");
        assert_eq!(out.value, Value::Float(3.1416));
        assert!(out.lossy);
        assert!(ty.coerce_str("abc").lossy);
    }

    #[test]
    fn test_coerce_value_passes_null() {
        assert!(ColumnType::UInt16.coerce(&Value::Null).value.is_null());
        assert_eq!(
            ColumnType::Varchar(10).coerce(&Value::Int(42)).value,
            Value::text("42")
        );
    }

    #[test]
    fn test_table_def_builder() {
        let def = TableDef::new("catalog", Engine::Durable)
            .column(ColumnSpec::new("bookid", ColumnType::UInt24).primary_key())
            .column(ColumnSpec::new("filename", ColumnType::Varchar(255)))
            .index(IndexSpec::on(["filename"]));
        assert_eq!(def.primary_key(), Some(0));
        assert_eq!(def.column_index("filename"), Some(1));
        assert_eq!(def.renamed("tmp").name, "tmp");
        assert_eq!(def.column_names(), vec!["bookid", "filename"]);
    }
}
