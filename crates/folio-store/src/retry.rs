//! Reconnect-and-retry-once wrapper.
//!
//! Any store call that fails with a transient error triggers one reconnect
//! followed by one retry. A second failure surfaces as
//! [`StoreError::RetryExhausted`] carrying the last cause.

use crate::ddl::TableDef;
use crate::error::{StoreError, StoreResult};
use crate::statement::{Procedure, Statement};
use crate::store::{LoadReport, RelationalStore};
use crate::value::RowSet;
use std::path::Path;
use tracing::warn;

/// A [`RelationalStore`] that retries transient failures once.
#[derive(Debug)]
pub struct Retrying<S> {
    inner: S,
}

impl<S: RelationalStore> Retrying<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn attempt<T>(&self, operation: &str, f: impl Fn(&S) -> StoreResult<T>) -> StoreResult<T> {
        match f(&self.inner) {
            Err(e) if e.is_transient() => {
                warn!(operation, error = %e, "transient store failure, reconnecting");
                let retried = self.inner.reconnect().and_then(|()| f(&self.inner));
                retried.map_err(|source| StoreError::RetryExhausted {
                    operation: operation.to_string(),
                    source: Box::new(source),
                })
            }
            other => other,
        }
    }
}

impl<S: RelationalStore> RelationalStore for Retrying<S> {
    fn define_table(&self, def: &TableDef) -> StoreResult<()> {
        self.attempt("define_table", |s| s.define_table(def))
    }

    fn drop_table(&self, name: &str) -> StoreResult<()> {
        self.attempt("drop_table", |s| s.drop_table(name))
    }

    fn bulk_load(
        &self,
        table: &str,
        source: &Path,
        columns: &[String],
    ) -> StoreResult<LoadReport> {
        self.attempt("bulk_load", |s| s.bulk_load(table, source, columns))
    }

    fn execute(&self, statement: &Statement) -> StoreResult<RowSet> {
        self.attempt("execute", |s| s.execute(statement))
    }

    fn row_count(&self, table: &str) -> StoreResult<u64> {
        self.attempt("row_count", |s| s.row_count(table))
    }

    fn reconnect(&self) -> StoreResult<()> {
        self.inner.reconnect()
    }

    // Rebuild procedures are idempotent, so a retry replays the whole
    // procedure and the inner store still sees it as one unit.
    fn run(&self, procedure: &Procedure) -> StoreResult<()> {
        self.attempt("run", |s| s.run(procedure))
    }
}
