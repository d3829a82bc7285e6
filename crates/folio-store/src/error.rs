//! Error types for store operations.

use thiserror::Error;

/// Errors that can occur at the relational store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection dropped or could not be established. Retryable.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// A transient failure persisted through the reconnect-and-retry attempt.
    #[error("{operation} failed after reconnect: {source}")]
    RetryExhausted {
        operation: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column '{column}' not found in {table}")]
    ColumnNotFound { table: String, column: String },

    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// A writer panicked while holding the table lock.
    #[error("store state poisoned by an earlier panic")]
    Poisoned,

    /// Snapshot file exists but cannot be decoded.
    #[error("store snapshot corrupted: {0}")]
    CorruptedSnapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether a reconnect-and-retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
