//! Exit codes for the folio CLI.
//!
//! Exit codes communicate the run outcome without requiring output parsing.

use crate::error::CompileError;

/// Exit codes for folio operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Run completed
    Clean = 0,

    /// Run completed but records were skipped or values coerced
    CompletedWithWarnings = 1,

    /// Ingestion stopped at the configured row limit
    RowLimitReached = 2,

    /// Configuration error
    ConfigError = 10,

    /// Invalid field definitions
    SchemaError = 11,

    /// Relational store failure
    StoreError = 12,

    /// Input or anchor-store failure during ingestion
    IngestError = 13,

    /// Registry or rehydration failure
    RegistryError = 14,

    /// I/O error
    IoError = 15,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ExitCode::Clean | ExitCode::CompletedWithWarnings | ExitCode::RowLimitReached
        )
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Map an error to its exit code by error-code decade.
    pub fn for_error(err: &CompileError) -> Self {
        match err.code() {
            10..=19 => ExitCode::ConfigError,
            20..=29 => ExitCode::SchemaError,
            30..=39 => ExitCode::StoreError,
            40..=49 => ExitCode::IngestError,
            50..=59 => ExitCode::RegistryError,
            60..=69 => ExitCode::IoError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}
