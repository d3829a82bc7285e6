//! Folio common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the folio crates:
//! - Anchor and run identity types
//! - The closed set of field datatypes and field definitions
//! - Schema versioning
//! - Common error types

pub mod error;
pub mod field;
pub mod id;
pub mod schema;

pub use error::{Error, Result};
pub use field::{FieldDefinition, FieldKind, StorageKind};
pub use id::{AnchorId, RunId};
pub use schema::SCHEMA_VERSION;
