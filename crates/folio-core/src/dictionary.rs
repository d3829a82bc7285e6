//! Frequency-ordered dictionary encoding.
//!
//! Each categorical field `f` gets a durable `f__id` table mapping raw value →
//! dense identifier → occurrence count. On the first build the most frequent
//! value receives identifier 0. Later builds refresh counts and append
//! identifiers for new values only, so an identifier never moves.

use crate::error::Result;
use folio_common::Error;
use folio_store::{
    Assignment, ColumnSpec, ColumnType, Engine, IndexSpec, Join, OrderBy, Procedure, Projection,
    RelationalStore, Select, Statement, TableDef,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage width of dictionary identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum IdWidth {
    Bits8,
    Bits16,
    Bits24,
    Bits32,
}

impl IdWidth {
    /// Smallest width whose unsigned range covers `cardinality`.
    pub fn for_cardinality(cardinality: u64) -> Self {
        match cardinality {
            0..=0xFF => IdWidth::Bits8,
            0x100..=0xFFFF => IdWidth::Bits16,
            0x1_0000..=0xFF_FFFF => IdWidth::Bits24,
            _ => IdWidth::Bits32,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            IdWidth::Bits8 => 8,
            IdWidth::Bits16 => 16,
            IdWidth::Bits24 => 24,
            IdWidth::Bits32 => 32,
        }
    }

    pub fn column_type(self) -> ColumnType {
        match self {
            IdWidth::Bits8 => ColumnType::UInt8,
            IdWidth::Bits16 => ColumnType::UInt16,
            IdWidth::Bits24 => ColumnType::UInt24,
            IdWidth::Bits32 => ColumnType::UInt32,
        }
    }
}

impl TryFrom<u32> for IdWidth {
    type Error = Error;

    fn try_from(bits: u32) -> std::result::Result<Self, Error> {
        match bits {
            8 => Ok(IdWidth::Bits8),
            16 => Ok(IdWidth::Bits16),
            24 => Ok(IdWidth::Bits24),
            32 => Ok(IdWidth::Bits32),
            other => Err(Error::UnsupportedWidth(other)),
        }
    }
}

impl From<IdWidth> for u32 {
    fn from(width: IdWidth) -> u32 {
        width.bits()
    }
}

impl fmt::Display for IdWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

// ── Names ───────────────────────────────────────────────────────────────

/// Table and column names derived from a field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryNames {
    /// `f__id`: the dictionary table, also the name of its identifier column.
    pub table: String,
    pub id_column: String,
    pub value_column: String,
    /// `f__count`
    pub count_column: String,
    /// Scratch table for grouped counts, private to this field.
    pub counts_table: String,
}

impl DictionaryNames {
    pub fn for_field(field: &str) -> Self {
        Self {
            table: format!("{field}__id"),
            id_column: format!("{field}__id"),
            value_column: field.to_string(),
            count_column: format!("{field}__count"),
            counts_table: format!("{field}__counts"),
        }
    }
}

const COUNT: &str = "count";

// ── Build procedure ─────────────────────────────────────────────────────

/// Durable definition of a field's dictionary table.
pub fn dictionary_def(field: &str, max_len: u32) -> TableDef {
    let names = DictionaryNames::for_field(field);
    TableDef::new(&names.table, Engine::Durable)
        .column(ColumnSpec::new(&names.id_column, ColumnType::UInt32).primary_key())
        .column(ColumnSpec::new(&names.value_column, ColumnType::Varchar(max_len)))
        .column(ColumnSpec::new(&names.count_column, ColumnType::UInt32))
        .index(IndexSpec::on([names.value_column.clone()]))
}

/// Procedure that builds or refreshes the dictionary of `field` from the
/// durable table `source`.
///
/// 1. Group `source` by value into a scratch counts table.
/// 2. Create the dictionary if missing.
/// 3. Refresh counts of values already present.
/// 4. Append values not yet present, most frequent first, continuing the
///    identifier sequence. Equal counts keep first-seen order.
pub fn build_procedure(field: &str, source: &str, max_len: u32) -> Procedure {
    let names = DictionaryNames::for_field(field);
    let counts = TableDef::new(&names.counts_table, Engine::Volatile)
        .column(ColumnSpec::new(&names.value_column, ColumnType::Varchar(max_len)))
        .column(ColumnSpec::new(COUNT, ColumnType::UInt32));

    Procedure::new()
        .step(Statement::drop(&names.counts_table))
        .step(Statement::create(counts))
        .step(Statement::InsertSelect {
            table: names.counts_table.clone(),
            columns: vec![names.value_column.clone(), COUNT.to_string()],
            select: Select::from(source)
                .columns([names.value_column.clone()])
                .project(Projection::count(COUNT))
                .group_by(&names.value_column),
        })
        .step(Statement::create(dictionary_def(field, max_len)))
        .step(Statement::UpdateFrom {
            table: names.table.clone(),
            source: names.counts_table.clone(),
            using: names.value_column.clone(),
            set: vec![Assignment {
                target: names.count_column.clone(),
                source: COUNT.to_string(),
            }],
        })
        .step(Statement::InsertSelect {
            table: names.table.clone(),
            columns: vec![
                names.id_column.clone(),
                names.value_column.clone(),
                names.count_column.clone(),
            ],
            select: Select::from(&names.counts_table)
                .join(Join::anti(&names.table, &names.value_column))
                .project(Projection::Sequence {
                    alias: names.id_column.clone(),
                    table: names.table.clone(),
                    column: names.id_column.clone(),
                })
                .columns([names.value_column.clone(), COUNT.to_string()])
                .order_by(OrderBy::desc(COUNT)),
        })
        .step(Statement::drop(&names.counts_table))
}

// ── Reading ─────────────────────────────────────────────────────────────

/// One dictionary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub id: u32,
    pub value: String,
    pub count: u64,
}

/// Read a dictionary ordered by identifier.
pub fn read_dictionary(store: &dyn RelationalStore, field: &str) -> Result<Vec<DictionaryEntry>> {
    let names = DictionaryNames::for_field(field);
    let rows = store.execute(&Statement::Select(
        Select::from(&names.table)
            .columns([
                names.id_column.clone(),
                names.value_column.clone(),
                names.count_column.clone(),
            ])
            .order_by(OrderBy::asc(&names.id_column)),
    ))?;
    Ok(rows
        .rows
        .iter()
        .map(|row| DictionaryEntry {
            id: row[0].as_i64().unwrap_or_default() as u32,
            value: row[1].to_string(),
            count: row[2].as_i64().unwrap_or_default() as u64,
        })
        .collect())
}

/// Current cardinality of a field's dictionary (0 when not built).
pub fn cardinality(store: &dyn RelationalStore, field: &str) -> Result<u64> {
    match store.row_count(&DictionaryNames::for_field(field).table) {
        Ok(n) => Ok(n),
        Err(folio_store::StoreError::TableNotFound(_)) => Ok(0),
        Err(e) => Err(e.into()),
    }
}
