//! Relational store boundary for the folio catalog compiler.
//!
//! This crate provides:
//! - A typed intermediate representation for table definitions and
//!   statements (no SQL strings cross the boundary)
//! - The [`RelationalStore`] trait the compiler depends on
//! - [`MemoryStore`], an in-process backend with durable-tier snapshots
//! - [`Retrying`], the reconnect-and-retry-once wrapper
//! - A MySQL dialect renderer for the same IR

pub mod ddl;
pub mod dialect;
pub mod error;
pub mod memory;
pub mod retry;
pub mod statement;
pub mod store;
pub mod value;

pub use ddl::{ColumnSpec, ColumnType, Engine, IndexSpec, TableDef};
pub use dialect::{Dialect, MySql};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use retry::Retrying;
pub use statement::{
    Assignment, Join, JoinKind, OrderBy, Predicate, Procedure, Projection, Select, Statement,
};
pub use store::{LoadReport, RelationalStore};
pub use value::{Row, RowSet, Value};
