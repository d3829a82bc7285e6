//! Field descriptors.
//!
//! A [`FieldDescriptor`] turns a field definition into storage policy: which
//! durable column holds it, whether it enters the volatile tier and at what
//! width, and the procedures that build its dictionary, lookup and heap.

use crate::dictionary::{self, DictionaryNames, IdWidth};
use crate::error::Result;
use folio_common::{FieldDefinition, FieldKind, StorageKind};
use folio_config::{CompilerConfig, TableSet};
use folio_store::{
    ColumnSpec, ColumnType, Engine, IndexSpec, Join, Procedure, Projection, RelationalStore,
    Select, Statement, TableDef,
};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

/// Prefix length for indexes over long text columns.
const TEXT_INDEX_PREFIX: u32 = 255;

/// Decimal columns hold 9 digits, 4 after the point.
pub const DECIMAL_TYPE: ColumnType = ColumnType::Decimal {
    precision: 9,
    scale: 4,
};

/// Storage policy for one field.
#[derive(Debug)]
pub struct FieldDescriptor {
    def: FieldDefinition,
    anchor: String,
    anchor_type: ColumnType,
    set: TableSet,
    text_max_len: u32,
    categorical_max_len: u32,
    /// Memoized on first use; dictionary cardinality only grows within a run.
    id_width: OnceLock<IdWidth>,
}

impl FieldDescriptor {
    /// Validate `def` and attach it to a table set.
    pub fn new(def: FieldDefinition, cfg: &CompilerConfig, set: &TableSet) -> Result<Self> {
        def.validate(&cfg.reserved_names())?;
        let anchor_type = IdWidth::try_from(cfg.anchor_width)?.column_type();
        Ok(Self {
            def,
            anchor: cfg.anchor_field.clone(),
            anchor_type,
            set: set.clone(),
            text_max_len: cfg.text_max_len,
            categorical_max_len: cfg.categorical_max_len,
            id_width: OnceLock::new(),
        })
    }

    pub fn field(&self) -> &str {
        &self.def.field
    }

    pub fn kind(&self) -> FieldKind {
        self.def.datatype
    }

    pub fn unique(&self) -> bool {
        self.def.unique
    }

    pub fn definition(&self) -> &FieldDefinition {
        &self.def
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn anchor_type(&self) -> ColumnType {
        self.anchor_type
    }

    pub fn table_set(&self) -> &TableSet {
        &self.set
    }

    pub fn is_categorical(&self) -> bool {
        self.def.datatype == FieldKind::Categorical
    }

    /// Column name the volatile tier addresses this field by.
    pub fn alias(&self) -> String {
        if self.is_categorical() {
            DictionaryNames::for_field(&self.def.field).id_column
        } else {
            self.def.field.clone()
        }
    }

    /// Durable table holding the raw values: the set's main table for unique
    /// fields, a private satellite table otherwise.
    pub fn durable_table(&self) -> String {
        if self.def.unique {
            self.set.durable.clone()
        } else {
            format!("{}_disk", self.def.field)
        }
    }

    /// Name of the per-field lookup table (categorical fields).
    pub fn lookup_table(&self) -> String {
        format!("{}_lookup", self.def.field)
    }

    /// Name of the per-field heap table (non-unique categorical fields).
    pub fn heap_table(&self) -> String {
        format!("{}_heap", self.def.field)
    }

    /// Volatile table queries should use to reach this field.
    pub fn volatile_table(&self) -> String {
        if self.def.unique {
            self.set.heap.clone()
        } else {
            self.heap_table()
        }
    }

    pub fn dictionary_table(&self) -> String {
        DictionaryNames::for_field(&self.def.field).table
    }

    // ── Durable tier ────────────────────────────────────────────────────

    /// Durable column definition.
    pub fn slow_column(&self) -> ColumnSpec {
        let ty = match self.def.datatype.storage() {
            StorageKind::Text => ColumnType::Varchar(self.text_max_len),
            StorageKind::Character => ColumnType::Varchar(self.categorical_max_len),
            StorageKind::Integer => ColumnType::Int,
            StorageKind::Decimal => DECIMAL_TYPE,
        };
        ColumnSpec::new(&self.def.field, ty)
    }

    /// Indexes on `(field)` and `(anchor, field)`; free text is never indexed.
    pub fn slow_indexes(&self, with_index: bool) -> Vec<IndexSpec> {
        if !with_index || self.def.datatype.storage() == StorageKind::Text {
            return Vec::new();
        }
        vec![
            IndexSpec::on([self.def.field.clone()]),
            IndexSpec::on([self.anchor.clone(), self.def.field.clone()]),
        ]
    }

    /// Satellite table for a non-unique field.
    pub fn disk_table_def(&self) -> Option<TableDef> {
        if self.def.unique {
            return None;
        }
        let mut def = TableDef::new(self.durable_table(), Engine::Durable)
            .column(ColumnSpec::new(&self.anchor, self.anchor_type))
            .column(self.slow_column())
            .index(IndexSpec::on([self.anchor.clone()]));
        for mut index in self.slow_indexes(true) {
            if self.slow_column().ty.is_text() && index.columns.len() == 1 {
                index.prefix_len = Some(TEXT_INDEX_PREFIX);
            }
            def = def.index(index);
        }
        Some(def)
    }

    // ── Volatile tier ───────────────────────────────────────────────────

    /// Identifier width for the current dictionary cardinality.
    pub fn id_width(&self, store: &dyn RelationalStore) -> Result<IdWidth> {
        if let Some(width) = self.id_width.get() {
            return Ok(*width);
        }
        let n = dictionary::cardinality(store, &self.def.field)?;
        let width = IdWidth::for_cardinality(n);
        debug!(field = %self.def.field, cardinality = n, width = %width, "identifier width chosen");
        Ok(*self.id_width.get_or_init(|| width))
    }

    /// Width if already computed.
    pub fn cached_id_width(&self) -> Option<IdWidth> {
        self.id_width.get().copied()
    }

    /// Volatile column, or `None` for text and opaque fields.
    pub fn volatile_column(&self, store: &dyn RelationalStore) -> Result<Option<ColumnSpec>> {
        Ok(match self.def.datatype {
            FieldKind::Categorical => Some(ColumnSpec::new(
                self.alias(),
                self.id_width(store)?.column_type(),
            )),
            FieldKind::Time | FieldKind::Integer => {
                Some(ColumnSpec::new(&self.def.field, ColumnType::Int))
            }
            FieldKind::Decimal => Some(ColumnSpec::new(&self.def.field, DECIMAL_TYPE)),
            FieldKind::Text | FieldKind::Other => None,
        })
    }

    /// Dictionary build procedure (categorical fields).
    pub fn build_dictionary(&self) -> Option<Procedure> {
        self.is_categorical().then(|| {
            dictionary::build_procedure(
                &self.def.field,
                &self.durable_table(),
                self.categorical_max_len,
            )
        })
    }

    /// Identifier → value lookup sized to the minimal width and the longest
    /// stored value. Built under a scratch name, then renamed into place.
    pub fn build_volatile_lookup(&self, store: &dyn RelationalStore) -> Result<Option<Procedure>> {
        if !self.is_categorical() {
            return Ok(None);
        }
        let names = DictionaryNames::for_field(&self.def.field);
        let width = self.id_width(store)?;
        let longest = store
            .execute(&Statement::Select(Select::from(&names.table).project(
                Projection::MaxCharLength {
                    column: names.value_column.clone(),
                    alias: "len".into(),
                },
            )))?
            .scalar()
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let max_len = u32::try_from(longest.max(1)).unwrap_or(self.categorical_max_len);

        let target = self.lookup_table();
        let scratch = format!("{target}__tmp");
        let def = TableDef::new(&scratch, Engine::Volatile)
            .column(ColumnSpec::new(&names.id_column, width.column_type()).primary_key())
            .column(ColumnSpec::new(&names.value_column, ColumnType::Varchar(max_len)));

        Ok(Some(
            Procedure::new()
                .step(Statement::drop(&scratch))
                .step(Statement::create(def))
                .step(Statement::InsertSelect {
                    table: scratch.clone(),
                    columns: vec![names.id_column.clone(), names.value_column.clone()],
                    select: Select::from(&names.table)
                        .columns([names.id_column.clone(), names.value_column.clone()]),
                })
                .step(Statement::rename(&scratch, &target)),
        ))
    }

    /// `(anchor, identifier)` pairs for a non-unique categorical field.
    pub fn build_volatile_heap(&self, store: &dyn RelationalStore) -> Result<Option<Procedure>> {
        if self.def.unique || !self.is_categorical() {
            return Ok(None);
        }
        let names = DictionaryNames::for_field(&self.def.field);
        let width = self.id_width(store)?;
        let target = self.heap_table();
        let scratch = format!("{target}__tmp");
        let def = TableDef::new(&scratch, Engine::Volatile)
            .column(ColumnSpec::new(&self.anchor, self.anchor_type))
            .column(ColumnSpec::new(&names.id_column, width.column_type()))
            .index(IndexSpec::on([self.anchor.clone()]));

        Ok(Some(
            Procedure::new()
                .step(Statement::drop(&scratch))
                .step(Statement::create(def))
                .step(Statement::InsertSelect {
                    table: scratch.clone(),
                    columns: vec![self.anchor.clone(), names.id_column.clone()],
                    select: Select::from(self.durable_table())
                        .join(Join::inner(&names.table, &names.value_column))
                        .columns([self.anchor.clone(), names.id_column.clone()]),
                })
                .step(Statement::rename(&scratch, &target)),
        ))
    }

    /// Tables whose contents a procedure of this field reads.
    pub fn volatile_dependencies(&self) -> Vec<String> {
        vec![self.dictionary_table(), self.durable_table()]
    }

    // ── Registry metadata ───────────────────────────────────────────────

    /// Record stored in the registry's field table.
    pub fn metadata_record(&self) -> FieldRecord {
        FieldRecord {
            dbname: self.def.field.clone(),
            name: self.def.display_name().to_string(),
            datatype: self.def.datatype,
            tablename: self.volatile_table(),
            anchor: self.anchor.clone(),
            alias: self.alias(),
            status: self.def.datatype.status().to_string(),
            description: self.def.description.clone().unwrap_or_default(),
            id_width: self.cached_id_width(),
            durable: self.set.durable.clone(),
        }
    }
}

/// Field metadata persisted alongside the registered procedures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub dbname: String,
    pub name: String,
    #[serde(rename = "type")]
    pub datatype: FieldKind,
    pub tablename: String,
    pub anchor: String,
    pub alias: String,
    pub status: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_width: Option<IdWidth>,
    /// Durable main table of the set that owns the field.
    pub durable: String,
}

impl FieldRecord {
    /// Recover the definition of a field registered under `set`, or `None`
    /// if another set owns it.
    pub fn definition_for(&self, set: &TableSet) -> Option<FieldDefinition> {
        if self.durable != set.durable {
            return None;
        }
        let unique = if self.tablename == set.heap {
            true
        } else if self.tablename == format!("{}_heap", self.dbname) {
            false
        } else {
            return None;
        };
        let mut def = FieldDefinition::new(&self.dbname, self.datatype, unique);
        if self.name != self.dbname {
            def.name = Some(self.name.clone());
        }
        if !self.description.is_empty() {
            def.description = Some(self.description.clone());
        }
        Some(def)
    }
}

// ── Table sets ──────────────────────────────────────────────────────────

/// Durable main table of a set: anchor, external key, then every unique
/// field in definition order.
pub fn main_table_def(
    set: &TableSet,
    cfg: &CompilerConfig,
    fields: &[FieldDescriptor],
) -> Result<TableDef> {
    let anchor_type = IdWidth::try_from(cfg.anchor_width)?.column_type();
    let mut def = TableDef::new(&set.durable, Engine::Durable)
        .column(ColumnSpec::new(&cfg.anchor_field, anchor_type).primary_key())
        .column(ColumnSpec::new(
            &cfg.key_field,
            ColumnType::Varchar(cfg.categorical_max_len),
        ))
        .index(IndexSpec::on([cfg.key_field.clone()]));
    for field in fields.iter().filter(|f| f.unique()) {
        def = def.column(field.slow_column());
        for index in field.slow_indexes(true) {
            def = def.index(index);
        }
    }
    Ok(def)
}

/// Volatile heap of a set: the anchor plus the volatile column of every
/// unique field, categorical fields joined to their identifiers.
///
/// Returns the procedure and the tables it reads.
pub fn build_main_heap(
    set: &TableSet,
    cfg: &CompilerConfig,
    fields: &[FieldDescriptor],
    store: &dyn RelationalStore,
) -> Result<(Procedure, Vec<String>)> {
    let anchor_type = IdWidth::try_from(cfg.anchor_width)?.column_type();
    let scratch = format!("{}__tmp", set.heap);
    let mut def = TableDef::new(&scratch, Engine::Volatile)
        .column(ColumnSpec::new(&cfg.anchor_field, anchor_type).primary_key());
    let mut select = Select::from(&set.durable).columns([cfg.anchor_field.clone()]);
    let mut columns = vec![cfg.anchor_field.clone()];
    let mut depends_on = vec![set.durable.clone()];

    for field in fields.iter().filter(|f| f.unique()) {
        let Some(column) = field.volatile_column(store)? else {
            continue;
        };
        if field.is_categorical() {
            select = select.join(Join::inner(field.dictionary_table(), field.field()));
            depends_on.push(field.dictionary_table());
        }
        select = select.columns([column.name.clone()]);
        columns.push(column.name.clone());
        def = def.column(column);
    }

    let procedure = Procedure::new()
        .step(Statement::drop(&scratch))
        .step(Statement::create(def))
        .step(Statement::InsertSelect {
            table: scratch.clone(),
            columns,
            select,
        })
        .step(Statement::rename(&scratch, &set.heap));
    Ok((procedure, depends_on))
}
