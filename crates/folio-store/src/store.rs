//! The relational store collaborator.

use crate::ddl::TableDef;
use crate::error::StoreResult;
use crate::statement::{Procedure, Statement};
use crate::value::RowSet;
use serde::Serialize;
use std::path::Path;

/// Outcome of a bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Rows appended to the table.
    pub rows: u64,
    /// Cells whose stored value differs from the source text.
    pub coerced: u64,
    /// Rows dropped because their primary key already existed.
    pub duplicates: u64,
}

/// The narrow interface the compiler needs from a relational engine.
///
/// Implementations must be shareable across threads: dictionary and
/// volatile-table builds for different fields may run concurrently.
pub trait RelationalStore: Send + Sync {
    /// Create a table unless one with the same name exists.
    fn define_table(&self, def: &TableDef) -> StoreResult<()>;

    /// Drop a table if it exists.
    fn drop_table(&self, name: &str) -> StoreResult<()>;

    /// Append rows from a tab-separated UTF-8 file, one record per line,
    /// mapping fields positionally onto `columns`.
    fn bulk_load(&self, table: &str, source: &Path, columns: &[String])
        -> StoreResult<LoadReport>;

    /// Execute one statement. Mutations return an empty row set.
    fn execute(&self, statement: &Statement) -> StoreResult<RowSet>;

    /// Number of rows currently in a table.
    fn row_count(&self, table: &str) -> StoreResult<u64>;

    /// Re-establish the underlying connection after a transient failure.
    fn reconnect(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Execute every step of a procedure in order, stopping at the first
    /// failure.
    fn run(&self, procedure: &Procedure) -> StoreResult<()> {
        for step in &procedure.steps {
            self.execute(step)?;
        }
        Ok(())
    }
}

impl<S: RelationalStore + ?Sized> RelationalStore for std::sync::Arc<S> {
    fn define_table(&self, def: &TableDef) -> StoreResult<()> {
        (**self).define_table(def)
    }

    fn drop_table(&self, name: &str) -> StoreResult<()> {
        (**self).drop_table(name)
    }

    fn bulk_load(
        &self,
        table: &str,
        source: &Path,
        columns: &[String],
    ) -> StoreResult<LoadReport> {
        (**self).bulk_load(table, source, columns)
    }

    fn execute(&self, statement: &Statement) -> StoreResult<RowSet> {
        (**self).execute(statement)
    }

    fn row_count(&self, table: &str) -> StoreResult<u64> {
        (**self).row_count(table)
    }

    fn reconnect(&self) -> StoreResult<()> {
        (**self).reconnect()
    }

    fn run(&self, procedure: &Procedure) -> StoreResult<()> {
        (**self).run(procedure)
    }
}
