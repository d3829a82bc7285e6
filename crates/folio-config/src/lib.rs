//! Folio configuration loading and validation.
//!
//! This crate provides:
//! - [`CompilerConfig`], the explicit per-deployment settings struct
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation
//! - Explicit field-schema file loading

pub mod config;
pub mod resolve;
pub mod schema_file;
pub mod validate;

pub use config::{CompilerConfig, LoadMode, TableSet};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource, ResolvedConfig};
pub use schema_file::{load_field_schema, parse_field_schema};
pub use validate::{validate_config, ValidationError, ValidationResult};
