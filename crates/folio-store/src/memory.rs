//! In-process relational store.
//!
//! Holds every table in memory behind a single `RwLock`. Durable tables can be
//! snapshotted to a JSON file after each mutation or procedure; volatile tables never are,
//! so reopening a snapshot (or calling [`MemoryStore::restart`]) behaves like a
//! server restart that wipes memory-engine tables.
//!
//! Load semantics follow permissive bulk loaders: values are coerced into
//! their column types, coercions are counted and logged, and primary-key
//! duplicates are skipped.

use crate::ddl::{Engine, TableDef};
use crate::error::{StoreError, StoreResult};
use crate::statement::{
    Assignment, JoinKind, Predicate, Procedure, Projection, Select, Statement,
};
use crate::store::{LoadReport, RelationalStore};
use crate::value::{Row, RowSet, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Table {
    def: TableDef,
    rows: Vec<Row>,
    /// Primary-key values present in `rows`.
    #[serde(skip)]
    keys: HashSet<Value>,
}

impl Table {
    fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: Vec::new(),
            keys: HashSet::new(),
        }
    }

    fn rebuild_keys(&mut self) {
        self.keys.clear();
        if let Some(pk) = self.def.primary_key() {
            self.keys
                .extend(self.rows.iter().map(|row| row[pk].clone()));
        }
    }

    /// Positions of `columns` in this table.
    fn positions(&self, columns: &[String]) -> StoreResult<Vec<usize>> {
        columns
            .iter()
            .map(|c| {
                self.def
                    .column_index(c)
                    .ok_or_else(|| StoreError::ColumnNotFound {
                        table: self.def.name.clone(),
                        column: c.clone(),
                    })
            })
            .collect()
    }

    /// Coerce and append one row laid out per `positions`. Returns whether the
    /// row was kept and how many cells were coerced.
    fn append(&mut self, positions: &[usize], values: Vec<Value>) -> (bool, u64) {
        let mut row: Row = vec![Value::Null; self.def.columns.len()];
        let mut coerced = 0;
        for (&pos, value) in positions.iter().zip(values) {
            let out = self.def.columns[pos].ty.coerce(&value);
            coerced += u64::from(out.lossy);
            row[pos] = out.value;
        }
        self.push_checked(row, coerced)
    }

    fn push_checked(&mut self, row: Row, coerced: u64) -> (bool, u64) {
        if let Some(pk) = self.def.primary_key() {
            if !self.keys.insert(row[pk].clone()) {
                return (false, coerced);
            }
        }
        self.rows.push(row);
        (true, coerced)
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
}

impl State {
    fn table(&self, name: &str) -> StoreResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> StoreResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    tables: Vec<Table>,
}

/// In-process [`RelationalStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    snapshot: Option<PathBuf>,
    /// Snapshot files written since opening.
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store with no persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store whose durable tables persist to `path`.
    ///
    /// A missing file yields an empty store. Volatile tables are never part of
    /// a snapshot, so they are absent after opening.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut state = State::default();
        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&contents)
                .map_err(|e| StoreError::CorruptedSnapshot(e.to_string()))?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(StoreError::CorruptedSnapshot(format!(
                    "unsupported snapshot version {}",
                    snapshot.version
                )));
            }
            for mut table in snapshot.tables {
                table.rebuild_keys();
                state.tables.insert(table.def.name.clone(), table);
            }
            info!(path = %path.display(), tables = state.tables.len(), "store snapshot loaded");
        }
        Ok(Self {
            state: RwLock::new(state),
            snapshot: Some(path),
            writes: AtomicU64::new(0),
        })
    }

    /// Simulate a server restart: every volatile table keeps its definition
    /// but loses its rows.
    pub fn restart(&self) -> StoreResult<()> {
        let mut state = self.write()?;
        for table in state.tables.values_mut() {
            if table.def.engine == Engine::Volatile {
                table.rows.clear();
                table.keys.clear();
            }
        }
        info!("volatile tables cleared");
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    fn persist(&self, state: &State) -> StoreResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            tables: state
                .tables
                .values()
                .filter(|t| t.def.engine == Engine::Durable)
                .cloned()
                .collect(),
        };
        let json = serde_json::to_vec(&snapshot)?;

        // Write atomically
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&json)?;
            file.flush()?;
        }
        fs::rename(&tmp_path, path)?;
        let writes = self.writes.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        debug!(path = %path.display(), writes, "store snapshot written");
        Ok(())
    }

    fn persist_if(&self, state: &State, touched: Option<Engine>) -> StoreResult<()> {
        if touched == Some(Engine::Durable) {
            self.persist(state)?;
        }
        Ok(())
    }

    /// Apply a mutation, returning the engine of the table it touched.
    fn apply(state: &mut State, statement: &Statement) -> StoreResult<Option<Engine>> {
        match statement {
            Statement::CreateTable { table } => {
                if !state.tables.contains_key(&table.name) {
                    state
                        .tables
                        .insert(table.name.clone(), Table::new(table.clone()));
                    return Ok(Some(table.engine));
                }
                Ok(None)
            }
            Statement::DropTable { name } => Ok(state.tables.remove(name).map(|t| t.def.engine)),
            Statement::RenameTable { from, to } => {
                let mut table = state
                    .tables
                    .remove(from)
                    .ok_or_else(|| StoreError::TableNotFound(from.clone()))?;
                let replaced = state.tables.remove(to).map(|t| t.def.engine);
                table.def.name = to.clone();
                let engine = table.def.engine;
                state.tables.insert(to.clone(), table);
                Ok(Some(if replaced == Some(Engine::Durable) {
                    Engine::Durable
                } else {
                    engine
                }))
            }
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                let target = state.table_mut(table)?;
                let positions = target.positions(columns)?;
                for row in rows {
                    if row.len() != positions.len() {
                        return Err(StoreError::InvalidStatement(format!(
                            "insert into {table}: {} values for {} columns",
                            row.len(),
                            positions.len()
                        )));
                    }
                    target.append(&positions, row.clone());
                }
                Ok(Some(target.def.engine))
            }
            Statement::InsertSelect {
                table,
                columns,
                select,
            } => {
                let result = eval_select(state, select)?;
                if result.columns.len() != columns.len() {
                    return Err(StoreError::InvalidStatement(format!(
                        "insert into {table}: select yields {} columns, {} expected",
                        result.columns.len(),
                        columns.len()
                    )));
                }
                let target = state.table_mut(table)?;
                let positions = target.positions(columns)?;
                let mut coerced = 0;
                let mut duplicates = 0;
                for row in result.rows {
                    let (kept, c) = target.append(&positions, row);
                    coerced += c;
                    duplicates += u64::from(!kept);
                }
                if coerced > 0 || duplicates > 0 {
                    warn!(table = %table, coerced, duplicates, "insert coerced or skipped rows");
                }
                Ok(Some(target.def.engine))
            }
            Statement::UpdateFrom {
                table,
                source,
                using,
                set,
            } => update_from(state, table, source, using, set),
            Statement::Delete { table, filter } => {
                let target = state.table_mut(table)?;
                let columns = target.def.column_names();
                let checks = compile_predicates(&columns, filter, table)?;
                target.rows.retain(|row| !matches_all(row, &checks));
                target.rebuild_keys();
                Ok(Some(target.def.engine))
            }
            Statement::Select(_) => Ok(None),
        }
    }
}

impl RelationalStore for MemoryStore {
    fn define_table(&self, def: &TableDef) -> StoreResult<()> {
        self.execute(&Statement::create(def.clone())).map(|_| ())
    }

    fn drop_table(&self, name: &str) -> StoreResult<()> {
        self.execute(&Statement::drop(name)).map(|_| ())
    }

    fn bulk_load(
        &self,
        table: &str,
        source: &Path,
        columns: &[String],
    ) -> StoreResult<LoadReport> {
        let reader = BufReader::new(File::open(source)?);
        let mut state = self.write()?;
        let target = state.table_mut(table)?;
        let positions = target.positions(columns)?;
        let mut report = LoadReport::default();

        for line in reader.lines() {
            let line = line?;
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() > positions.len() {
                report.coerced += (fields.len() - positions.len()) as u64;
            }
            let mut row: Row = vec![Value::Null; target.def.columns.len()];
            let mut coerced = 0;
            for (i, &pos) in positions.iter().enumerate() {
                let raw = fields.get(i).copied().unwrap_or("");
                let out = target.def.columns[pos].ty.coerce_str(raw);
                coerced += u64::from(out.lossy || i >= fields.len());
                row[pos] = out.value;
            }
            let (kept, coerced) = target.push_checked(row, coerced);
            report.coerced += coerced;
            if kept {
                report.rows += 1;
            } else {
                report.duplicates += 1;
            }
        }

        if report.coerced > 0 {
            warn!(
                table,
                coerced = report.coerced,
                "bulk load coerced values to fit column types"
            );
        }
        if report.duplicates > 0 {
            warn!(
                table,
                duplicates = report.duplicates,
                "bulk load skipped duplicate primary keys"
            );
        }
        debug!(table, rows = report.rows, source = %source.display(), "bulk load complete");

        let touched = Some(target.def.engine);
        self.persist_if(&state, touched)?;
        Ok(report)
    }

    fn execute(&self, statement: &Statement) -> StoreResult<RowSet> {
        if let Statement::Select(select) = statement {
            let state = self.read()?;
            return eval_select(&state, select);
        }
        let mut state = self.write()?;
        let touched = Self::apply(&mut state, statement)?;
        self.persist_if(&state, touched)?;
        Ok(RowSet::default())
    }

    fn row_count(&self, table: &str) -> StoreResult<u64> {
        Ok(self.read()?.table(table)?.rows.len() as u64)
    }

    /// Applies every step under one lock and writes the snapshot at most
    /// once. Steps applied before a failure are still persisted.
    fn run(&self, procedure: &Procedure) -> StoreResult<()> {
        let mut state = self.write()?;
        let mut durable = false;
        let mut outcome = Ok(());
        for step in &procedure.steps {
            let applied = match step {
                Statement::Select(select) => eval_select(&state, select).map(|_| None),
                other => Self::apply(&mut state, other),
            };
            match applied {
                Ok(touched) => durable |= touched == Some(Engine::Durable),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        if durable {
            self.persist(&state)?;
        }
        outcome
    }
}

// ── Statement evaluation ────────────────────────────────────────────────

fn resolve(columns: &[String], name: &str, table: &str) -> StoreResult<usize> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| StoreError::ColumnNotFound {
            table: table.to_string(),
            column: name.to_string(),
        })
}

enum Check<'a> {
    Eq(usize, &'a Value),
    Gt(usize, &'a Value),
    IsNull(usize),
}

fn compile_predicates<'a>(
    columns: &[String],
    filter: &'a [Predicate],
    table: &str,
) -> StoreResult<Vec<Check<'a>>> {
    filter
        .iter()
        .map(|p| {
            let idx = resolve(columns, p.column(), table)?;
            Ok(match p {
                Predicate::Eq { value, .. } => Check::Eq(idx, value),
                Predicate::Gt { value, .. } => Check::Gt(idx, value),
                Predicate::IsNull { .. } => Check::IsNull(idx),
            })
        })
        .collect()
}

fn matches_all(row: &Row, checks: &[Check<'_>]) -> bool {
    checks.iter().all(|check| match check {
        Check::Eq(i, v) => !row[*i].is_null() && row[*i] == **v,
        Check::Gt(i, v) => !row[*i].is_null() && row[*i].total_cmp(v) == Ordering::Greater,
        Check::IsNull(i) => row[*i].is_null(),
    })
}

fn eval_select(state: &State, select: &Select) -> StoreResult<RowSet> {
    let base = state.table(&select.from)?;
    let mut columns = base.def.column_names();
    let mut rows: Vec<Row> = base.rows.clone();

    for join in &select.joins {
        let right = state.table(&join.table)?;
        let left_key = resolve(&columns, &join.using, &select.from)?;
        let right_key = resolve(&right.def.column_names(), &join.using, &join.table)?;

        let mut index: HashMap<&Value, Vec<usize>> = HashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            if !row[right_key].is_null() {
                index.entry(&row[right_key]).or_default().push(i);
            }
        }

        match join.kind {
            JoinKind::Inner => {
                let mut joined = Vec::with_capacity(rows.len());
                for left in rows {
                    if left[left_key].is_null() {
                        continue;
                    }
                    if let Some(matches) = index.get(&left[left_key]) {
                        for &m in matches {
                            let mut row = left.clone();
                            row.extend(
                                right.rows[m]
                                    .iter()
                                    .enumerate()
                                    .filter(|(i, _)| *i != right_key)
                                    .map(|(_, v)| v.clone()),
                            );
                            joined.push(row);
                        }
                    }
                }
                rows = joined;
                columns.extend(
                    right
                        .def
                        .columns
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != right_key)
                        .map(|(_, c)| c.name.clone()),
                );
            }
            JoinKind::Anti => {
                rows.retain(|left| left[left_key].is_null() || !index.contains_key(&left[left_key]));
            }
        }
    }

    let checks = compile_predicates(&columns, &select.filter, &select.from)?;
    rows.retain(|row| matches_all(row, &checks));

    let projection: Vec<Projection> = if select.projection.is_empty() {
        columns.iter().map(Projection::column).collect()
    } else {
        select.projection.clone()
    };
    let out_columns: Vec<String> = projection
        .iter()
        .map(|p| p.output_name().to_string())
        .collect();

    let aggregate = !select.group_by.is_empty() || projection.iter().any(Projection::is_aggregate);
    let mut out_rows: Vec<Row> = if aggregate {
        let group_keys = select
            .group_by
            .iter()
            .map(|g| resolve(&columns, g, &select.from))
            .collect::<StoreResult<Vec<_>>>()?;

        // Groups in order of first appearance.
        let mut groups: Vec<Vec<&Row>> = Vec::new();
        if group_keys.is_empty() {
            groups.push(rows.iter().collect());
        } else {
            let mut slot: HashMap<Vec<&Value>, usize> = HashMap::new();
            for row in &rows {
                let key: Vec<&Value> = group_keys.iter().map(|&k| &row[k]).collect();
                let idx = *slot.entry(key).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[idx].push(row);
            }
        }

        groups
            .iter()
            .map(|group| {
                projection
                    .iter()
                    .map(|p| aggregate_cell(p, group, &columns, &select.from))
                    .collect::<StoreResult<Row>>()
            })
            .collect::<StoreResult<Vec<Row>>>()?
    } else {
        let positions = projection
            .iter()
            .map(|p| match p {
                Projection::Column { name } => resolve(&columns, name, &select.from).map(Some),
                _ => Ok(None),
            })
            .collect::<StoreResult<Vec<_>>>()?;
        rows.iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|pos| pos.map_or(Value::Null, |p| row[p].clone()))
                    .collect()
            })
            .collect()
    };

    if !select.order_by.is_empty() {
        let keys = select
            .order_by
            .iter()
            .map(|o| resolve(&out_columns, &o.column, &select.from).map(|i| (i, o.descending)))
            .collect::<StoreResult<Vec<_>>>()?;
        // Stable: ties keep first-appearance order.
        out_rows.sort_by(|a, b| {
            for &(i, desc) in &keys {
                let ord = a[i].total_cmp(&b[i]);
                let ord = if desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    if let Some(limit) = select.limit {
        out_rows.truncate(limit);
    }

    for (pos, p) in projection.iter().enumerate() {
        if let Projection::Sequence { table, column, .. } = p {
            let source = state.table(table)?;
            let idx = resolve(&source.def.column_names(), column, table)?;
            let start = source
                .rows
                .iter()
                .filter_map(|r| r[idx].as_i64())
                .max()
                .map_or(0, |max| max + 1);
            for (offset, row) in out_rows.iter_mut().enumerate() {
                row[pos] = Value::Int(start + offset as i64);
            }
        }
    }

    Ok(RowSet::new(out_columns, out_rows))
}

fn aggregate_cell(
    projection: &Projection,
    group: &[&Row],
    columns: &[String],
    table: &str,
) -> StoreResult<Value> {
    let non_null = |column: &str| -> StoreResult<Vec<&Value>> {
        let idx = resolve(columns, column, table)?;
        Ok(group.iter().map(|r| &r[idx]).filter(|v| !v.is_null()).collect())
    };
    Ok(match projection {
        Projection::Column { name } => {
            let idx = resolve(columns, name, table)?;
            group.first().map_or(Value::Null, |r| r[idx].clone())
        }
        Projection::Count { .. } => Value::Int(group.len() as i64),
        Projection::CountDistinct { column, .. } => {
            let distinct: HashSet<&Value> = non_null(column)?.into_iter().collect();
            Value::Int(distinct.len() as i64)
        }
        Projection::Min { column, .. } => non_null(column)?
            .into_iter()
            .min_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        Projection::Max { column, .. } => non_null(column)?
            .into_iter()
            .max_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        Projection::MaxCharLength { column, .. } => non_null(column)?
            .into_iter()
            .map(Value::char_len)
            .max()
            .map_or(Value::Null, |len| Value::Int(len as i64)),
        Projection::Sequence { .. } => Value::Null,
    })
}

fn update_from(
    state: &mut State,
    table: &str,
    source: &str,
    using: &str,
    set: &[Assignment],
) -> StoreResult<Option<Engine>> {
    // Snapshot the source cells first; source and target may not be borrowed
    // together.
    let lookup: HashMap<Value, Vec<Value>> = {
        let src = state.table(source)?;
        let src_columns = src.def.column_names();
        let key = resolve(&src_columns, using, source)?;
        let cols = set
            .iter()
            .map(|a| resolve(&src_columns, &a.source, source))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut lookup = HashMap::new();
        for row in &src.rows {
            if row[key].is_null() {
                continue;
            }
            lookup
                .entry(row[key].clone())
                .or_insert_with(|| cols.iter().map(|&c| row[c].clone()).collect());
        }
        lookup
    };

    let target = state.table_mut(table)?;
    let target_columns = target.def.column_names();
    let key = resolve(&target_columns, using, table)?;
    let targets = set
        .iter()
        .map(|a| resolve(&target_columns, &a.target, table))
        .collect::<StoreResult<Vec<_>>>()?;
    let touches_key = target
        .def
        .primary_key()
        .is_some_and(|pk| targets.contains(&pk));

    let mut updated = 0u64;
    for row in &mut target.rows {
        if let Some(values) = lookup.get(&row[key]) {
            for (&t, v) in targets.iter().zip(values) {
                row[t] = target.def.columns[t].ty.coerce(v).value;
            }
            updated += 1;
        }
    }
    if touches_key {
        target.rebuild_keys();
    }
    debug!(table, source, updated, "joined update applied");
    Ok(Some(target.def.engine))
}
