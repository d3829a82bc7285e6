//! Error types shared by the folio crates.

use thiserror::Error;

/// Result type alias for folio operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for definition and validation failures.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid field schema: {0}")]
    InvalidSchema(String),

    // Validation errors (20-29)
    #[error("field name must not be empty")]
    EmptyFieldName,

    #[error("field '{field}' collides with reserved name '{reserved}'")]
    ReservedFieldName { field: String, reserved: String },

    #[error("field '{field}' contains characters outside [A-Za-z0-9_]")]
    InvalidFieldName { field: String },

    #[error("field '{0}' is defined more than once")]
    DuplicateField(String),

    #[error("unsupported identifier width: {0} bits")]
    UnsupportedWidth(u32),

    #[error("field '{field}' is already registered by table set '{owner}'")]
    FieldOwnedByOtherSet { field: String, owner: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidSchema(_) => 11,
            Error::EmptyFieldName => 20,
            Error::ReservedFieldName { .. } => 21,
            Error::InvalidFieldName { .. } => 22,
            Error::DuplicateField(_) => 23,
            Error::UnsupportedWidth(_) => 24,
            Error::FieldOwnedByOtherSet { .. } => 25,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }
}
