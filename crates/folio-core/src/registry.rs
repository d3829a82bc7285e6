//! Materialization registry.
//!
//! Durable record of how every derived table is rebuilt. Procedures are
//! stored as serialized statement IR in the store's own durable tier, so they
//! survive the restarts that wipe the volatile tier.
//!
//! Rehydration replays procedures in dependency order: a table is rebuilt
//! when it is empty or missing, when `force` is set, or when any registered
//! table it reads from was rebuilt in the same pass.

use crate::descriptor::FieldRecord;
use crate::dictionary::IdWidth;
use crate::error::{CompileError, Result};
use chrono::Utc;
use folio_common::schema::is_compatible;
use folio_common::SCHEMA_VERSION;
use folio_store::{
    ColumnSpec, ColumnType, Dialect, Engine, OrderBy, Predicate, Procedure, RelationalStore,
    Select, Statement, StoreError, TableDef, Value,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// Durable table holding one row per registered procedure.
pub const TABLES_TABLE: &str = "registry_tables";
/// Durable table holding field metadata records.
pub const FIELDS_TABLE: &str = "registry_fields";

/// Largest serialized procedure the registry stores.
const PROCEDURE_MAX_LEN: u32 = 65_535;
const NAME_MAX_LEN: u32 = 255;

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// A registered rebuild procedure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisteredTable {
    pub tablename: String,
    /// Tables the procedure reads from.
    pub depends_on: Vec<String>,
    pub procedure: Procedure,
    /// SHA-256 of the serialized procedure.
    pub fingerprint: String,
    pub schema_version: String,
    pub registered_at: String,
}

/// Outcome of a rehydration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RehydrateReport {
    /// Tables rebuilt, in execution order.
    pub rebuilt: Vec<String>,
    /// Tables left untouched because they already held rows.
    pub intact: Vec<String>,
}

/// Registry bound to a store.
pub struct Registry<'a> {
    store: &'a dyn RelationalStore,
}

impl<'a> Registry<'a> {
    pub fn new(store: &'a dyn RelationalStore) -> Self {
        Self { store }
    }

    fn tables_def() -> TableDef {
        TableDef::new(TABLES_TABLE, Engine::Durable)
            .column(ColumnSpec::new("tablename", ColumnType::Varchar(NAME_MAX_LEN)).primary_key())
            .column(ColumnSpec::new("depends_on", ColumnType::Varchar(PROCEDURE_MAX_LEN)))
            .column(ColumnSpec::new("procedure", ColumnType::Varchar(PROCEDURE_MAX_LEN)))
            .column(ColumnSpec::new("fingerprint", ColumnType::Varchar(64)))
            .column(ColumnSpec::new("schema_version", ColumnType::Varchar(16)))
            .column(ColumnSpec::new("registered_at", ColumnType::Varchar(40)))
    }

    fn fields_def() -> TableDef {
        let text = |name: &str| ColumnSpec::new(name, ColumnType::Varchar(NAME_MAX_LEN));
        TableDef::new(FIELDS_TABLE, Engine::Durable)
            .column(text("dbname").primary_key())
            .column(text("name"))
            .column(text("type"))
            .column(text("tablename"))
            .column(text("anchor"))
            .column(text("alias"))
            .column(text("status"))
            .column(ColumnSpec::new("description", ColumnType::Varchar(PROCEDURE_MAX_LEN)))
            .column(ColumnSpec::new("id_width", ColumnType::UInt8))
            .column(text("durable"))
    }

    /// Create the registry tables if missing.
    pub fn ensure_tables(&self) -> Result<()> {
        self.store.define_table(&Self::tables_def())?;
        self.store.define_table(&Self::fields_def())?;
        Ok(())
    }

    /// Upsert the procedure for `tablename` and the metadata of the fields it
    /// serves. Re-registering a table replaces its previous procedure.
    pub fn register(
        &self,
        tablename: &str,
        procedure: &Procedure,
        depends_on: &[String],
        fields: &[FieldRecord],
    ) -> Result<()> {
        self.ensure_tables()?;
        let json = serde_json::to_string(procedure)?;
        if json.chars().count() > PROCEDURE_MAX_LEN as usize {
            return Err(CompileError::CorruptRegistry {
                table: tablename.to_string(),
                reason: format!("procedure exceeds {PROCEDURE_MAX_LEN} characters"),
            });
        }
        let fingerprint = sha256_hex(json.as_bytes());

        self.store.run(
            &Procedure::new()
                .step(Statement::Delete {
                    table: TABLES_TABLE.into(),
                    filter: vec![Predicate::eq("tablename", tablename)],
                })
                .step(Statement::Insert {
                    table: TABLES_TABLE.into(),
                    columns: Self::tables_def().column_names(),
                    rows: vec![vec![
                        Value::text(tablename),
                        Value::text(serde_json::to_string(depends_on)?),
                        Value::text(json),
                        Value::text(&fingerprint),
                        Value::text(SCHEMA_VERSION),
                        Value::text(Utc::now().to_rfc3339()),
                    ]],
                }),
        )?;

        for record in fields {
            self.register_field(record)?;
        }
        debug!(table = tablename, fingerprint = %fingerprint, "procedure registered");
        Ok(())
    }

    /// Upsert one field metadata record.
    ///
    /// A field name belongs to the first table set that registers it; a
    /// record from another set is refused instead of replacing it.
    pub fn register_field(&self, record: &FieldRecord) -> Result<()> {
        self.ensure_tables()?;
        if let Some(owner) = self.owner_of(&record.dbname)? {
            if owner != record.durable {
                return Err(folio_common::Error::FieldOwnedByOtherSet {
                    field: record.dbname.clone(),
                    owner,
                }
                .into());
            }
        }
        self.store.run(
            &Procedure::new()
                .step(Statement::Delete {
                    table: FIELDS_TABLE.into(),
                    filter: vec![Predicate::eq("dbname", record.dbname.as_str())],
                })
                .step(Statement::Insert {
                    table: FIELDS_TABLE.into(),
                    columns: Self::fields_def().column_names(),
                    rows: vec![vec![
                        Value::text(&record.dbname),
                        Value::text(&record.name),
                        Value::text(record.datatype.as_str()),
                        Value::text(&record.tablename),
                        Value::text(&record.anchor),
                        Value::text(&record.alias),
                        Value::text(&record.status),
                        Value::text(&record.description),
                        record
                            .id_width
                            .map_or(Value::Null, |w| Value::from(u32::from(w))),
                        Value::text(&record.durable),
                    ]],
                }),
        )?;
        Ok(())
    }

    /// Durable table of the set that registered `field`, if any.
    pub fn owner_of(&self, field: &str) -> Result<Option<String>> {
        Ok(self
            .fields()?
            .into_iter()
            .find(|r| r.dbname == field)
            .map(|r| r.durable))
    }

    /// Every registered procedure, sorted by table name.
    pub fn entries(&self) -> Result<Vec<RegisteredTable>> {
        let rows = match self.store.execute(&Statement::Select(
            Select::from(TABLES_TABLE)
                .columns([
                    "tablename",
                    "depends_on",
                    "procedure",
                    "fingerprint",
                    "schema_version",
                    "registered_at",
                ])
                .order_by(OrderBy::asc("tablename")),
        )) {
            Ok(rows) => rows,
            Err(StoreError::TableNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        rows.rows
            .iter()
            .map(|row| {
                let tablename = row[0].to_string();
                let corrupt = |reason: String| CompileError::CorruptRegistry {
                    table: tablename.clone(),
                    reason,
                };
                let json = row[2].to_string();
                let fingerprint = row[3].to_string();
                if sha256_hex(json.as_bytes()) != fingerprint {
                    return Err(corrupt("fingerprint mismatch".into()));
                }
                let depends_on: Vec<String> = serde_json::from_str(&row[1].to_string())
                    .map_err(|e| corrupt(e.to_string()))?;
                let procedure: Procedure =
                    serde_json::from_str(&json).map_err(|e| corrupt(e.to_string()))?;
                Ok(RegisteredTable {
                    tablename: tablename.clone(),
                    depends_on,
                    procedure,
                    fingerprint,
                    schema_version: row[4].to_string(),
                    registered_at: row[5].to_string(),
                })
            })
            .collect()
    }

    /// Every field metadata record, sorted by field name.
    pub fn fields(&self) -> Result<Vec<FieldRecord>> {
        let rows = match self.store.execute(&Statement::Select(
            Select::from(FIELDS_TABLE).order_by(OrderBy::asc("dbname")),
        )) {
            Ok(rows) => rows,
            Err(StoreError::TableNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        rows.rows
            .iter()
            .map(|row| {
                let datatype = serde_json::from_value(serde_json::Value::String(row[2].to_string()))
                    .map_err(|e| CompileError::CorruptRegistry {
                        table: FIELDS_TABLE.into(),
                        reason: e.to_string(),
                    })?;
                let id_width = match row[8].as_i64() {
                    Some(bits) => Some(IdWidth::try_from(u32::try_from(bits).unwrap_or(0))?),
                    None => None,
                };
                Ok(FieldRecord {
                    dbname: row[0].to_string(),
                    name: row[1].to_string(),
                    datatype,
                    tablename: row[3].to_string(),
                    anchor: row[4].to_string(),
                    alias: row[5].to_string(),
                    status: row[6].to_string(),
                    description: row[7].to_string(),
                    id_width,
                    durable: row[9].to_string(),
                })
            })
            .collect()
    }

    /// Registered entries in dependency order; ties by name.
    pub fn ordered_entries(&self) -> Result<Vec<RegisteredTable>> {
        topo_sort(self.entries()?)
    }

    /// Rebuild every registered table that needs it.
    pub fn rehydrate(&self, force: bool) -> Result<RehydrateReport> {
        let entries = self.ordered_entries()?;
        let registered: HashSet<String> = entries.iter().map(|e| e.tablename.clone()).collect();
        let mut rebuilt: HashSet<String> = HashSet::new();
        let mut report = RehydrateReport::default();

        for entry in entries {
            if !is_compatible(&entry.schema_version) {
                return Err(CompileError::IncompatibleProcedure {
                    table: entry.tablename,
                    version: entry.schema_version,
                });
            }
            for dep in entry.depends_on.iter().filter(|d| !registered.contains(*d)) {
                if let Err(StoreError::TableNotFound(_)) = self.store.row_count(dep) {
                    return Err(CompileError::MissingDependency {
                        table: entry.tablename.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            let rows = match self.store.row_count(&entry.tablename) {
                Ok(n) => n,
                Err(StoreError::TableNotFound(_)) => 0,
                Err(e) => return Err(e.into()),
            };
            let upstream = entry.depends_on.iter().any(|d| rebuilt.contains(d));

            if force || rows == 0 || upstream {
                info!(
                    table = %entry.tablename,
                    rows,
                    force,
                    upstream,
                    steps = entry.procedure.steps.len(),
                    "rehydrating"
                );
                self.store.run(&entry.procedure)?;
                rebuilt.insert(entry.tablename.clone());
                report.rebuilt.push(entry.tablename);
            } else {
                debug!(table = %entry.tablename, rows, "table intact");
                report.intact.push(entry.tablename);
            }
        }
        Ok(report)
    }

    /// Render every procedure, dependency-ordered, as one script.
    pub fn script(&self, dialect: &dyn Dialect) -> Result<String> {
        let mut out = String::new();
        for entry in self.ordered_entries()? {
            out.push_str(&format!("-- {}\n", entry.tablename));
            out.push_str(&dialect.render_procedure(&entry.procedure));
            out.push('\n');
        }
        Ok(out)
    }
}

/// Kahn's algorithm over registered names; dependencies on unregistered
/// tables impose no order.
fn topo_sort(entries: Vec<RegisteredTable>) -> Result<Vec<RegisteredTable>> {
    let mut by_name: BTreeMap<String, RegisteredTable> = entries
        .into_iter()
        .map(|e| (e.tablename.clone(), e))
        .collect();
    let mut pending: BTreeMap<String, BTreeSet<String>> = by_name
        .iter()
        .map(|(name, e)| {
            let deps = e
                .depends_on
                .iter()
                .filter(|d| by_name.contains_key(*d) && *d != name)
                .cloned()
                .collect();
            (name.clone(), deps)
        })
        .collect();

    let mut ordered = Vec::with_capacity(by_name.len());
    while !pending.is_empty() {
        let Some(ready) = pending
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(name, _)| name.clone())
        else {
            let stuck = pending.keys().next().cloned().unwrap_or_default();
            return Err(CompileError::DependencyCycle(stuck));
        };
        pending.remove(&ready);
        for deps in pending.values_mut() {
            deps.remove(&ready);
        }
        if let Some(entry) = by_name.remove(&ready) {
            ordered.push(entry);
        }
    }
    Ok(ordered)
}
