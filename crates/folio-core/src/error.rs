//! Compiler error type.

use crate::anchor::AnchorError;
use folio_config::ValidationError;
use folio_store::StoreError;
use thiserror::Error;

/// Errors that abort a compilation run.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Config(#[from] ValidationError),

    #[error(transparent)]
    Field(#[from] folio_common::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    // Ingest errors (40-49)
    #[error("anchor store error: {0}")]
    Anchor(#[from] AnchorError),

    #[error("failed to read input {path}: {reason}")]
    Input { path: String, reason: String },

    #[error("no fields to compile")]
    NoFields,

    // Registry errors (50-59)
    #[error("{table} depends on {dependency}, which is neither registered nor present")]
    MissingDependency { table: String, dependency: String },

    #[error("registered procedures form a cycle through {0}")]
    DependencyCycle(String),

    #[error("registry record for {table} is unreadable: {reason}")]
    CorruptRegistry { table: String, reason: String },

    #[error("procedure for {table} was written by incompatible schema {version}")]
    IncompatibleProcedure { table: String, version: String },

    #[error("unknown field: {0}")]
    UnknownField(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompileError {
    /// Stable error code, grouped by decade.
    pub fn code(&self) -> u32 {
        match self {
            CompileError::Config(e) => e.code(),
            CompileError::Field(e) => e.code(),
            CompileError::Store(e) => match e {
                StoreError::Connection(_) | StoreError::RetryExhausted { .. } => 30,
                StoreError::TableNotFound(_) => 31,
                StoreError::ColumnNotFound { .. } => 32,
                StoreError::InvalidStatement(_) => 33,
                StoreError::CorruptedSnapshot(_) => 34,
                StoreError::Poisoned => 35,
                StoreError::Io(_) => 60,
                StoreError::Json(_) => 61,
            },
            CompileError::Anchor(AnchorError::Io(_)) => 60,
            CompileError::Anchor(_) => 40,
            CompileError::Input { .. } => 41,
            CompileError::NoFields => 42,
            CompileError::MissingDependency { .. } => 50,
            CompileError::DependencyCycle(_) => 51,
            CompileError::CorruptRegistry { .. } => 52,
            CompileError::IncompatibleProcedure { .. } => 53,
            CompileError::UnknownField(_) => 54,
            CompileError::Io(_) => 60,
            CompileError::Json(_) => 61,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_by_decade() {
        assert_eq!(
            CompileError::from(StoreError::Connection("gone".into())).code(),
            30
        );
        assert_eq!(
            CompileError::from(folio_common::Error::EmptyFieldName).code(),
            20
        );
        assert_eq!(
            CompileError::MissingDependency {
                table: "genre_heap".into(),
                dependency: "genre_disk".into()
            }
            .code(),
            50
        );
        assert_eq!(CompileError::NoFields.code() / 10, 4);
    }
}
