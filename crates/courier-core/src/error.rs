//! Error types module
//!
//! This module provides the core error types used throughout the courier
//! application. All errors are unified under the `AppError` enum, which covers
//! both the transfer-domain failures (incomplete completion, size mismatch,
//! expired capabilities, duplicate writes) and the ambient database, storage,
//! and validation failures.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx`
//! feature so storage-only consumers can build without a database stack.

use std::io;

use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like incomplete uploads
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented.
/// This trait allows errors to self-describe their HTTP response characteristics.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "SIZE_MISMATCH")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Completion attempted while some file entries are not yet written.
    /// Carries the missing entry ids so the client can retry only those files.
    #[error("Upload incomplete: {} file(s) not yet written", missing.len())]
    Incomplete { missing: Vec<Uuid> },

    /// Observed written size differs from the declared size. Hard failure:
    /// the entry is marked failed rather than silently accepted.
    #[error("Size mismatch for file {file_id}: declared {declared} bytes, observed {observed}")]
    SizeMismatch {
        file_id: Uuid,
        declared: u64,
        observed: u64,
    },

    /// A write location was requested for an entry that is already written
    /// and overwriting was not requested or not permitted.
    #[error("Already written: {0}")]
    AlreadyWritten(String),

    /// A capability token or download is past its validity window.
    #[error("Expired: {0}")]
    Expired(String),

    /// Archive assembly failed after output bytes were already emitted.
    #[error("Partial failure during archive streaming: {0}")]
    PartialFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

// Error conversion implementations following Rust best practices
#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
/// Reduces duplication in the ErrorMetadata impl; client_message stays per-variant for dynamic content.
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::Forbidden(_) => (
            403,
            "FORBIDDEN",
            false,
            None,
            false,
            LogLevel::Warn,
        ),
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Check the authentication token"),
            false,
            LogLevel::Debug,
        ),
        AppError::Incomplete { .. } => (
            409,
            "UPLOAD_INCOMPLETE",
            true,
            Some("Write the missing files, then retry completion"),
            false,
            LogLevel::Debug,
        ),
        AppError::SizeMismatch { .. } => (
            422,
            "SIZE_MISMATCH",
            false,
            Some("Re-upload the file with the declared size"),
            false,
            LogLevel::Warn,
        ),
        AppError::AlreadyWritten(_) => (
            409,
            "ALREADY_WRITTEN",
            false,
            Some("Request the location with overwrite enabled if replacement is intended"),
            false,
            LogLevel::Debug,
        ),
        AppError::Expired(_) => (
            410,
            "EXPIRED",
            false,
            Some("Request a fresh location"),
            false,
            LogLevel::Debug,
        ),
        AppError::PartialFailure(_) => (
            500,
            "PARTIAL_FAILURE",
            true,
            Some("Retry the archive request"),
            true,
            LogLevel::Error,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Incomplete { .. } => "Incomplete",
            AppError::SizeMismatch { .. } => "SizeMismatch",
            AppError::AlreadyWritten(_) => "AlreadyWritten",
            AppError::Expired(_) => "Expired",
            AppError::PartialFailure(_) => "PartialFailure",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Missing file-entry ids when this is an `Incomplete` error.
    pub fn missing_files(&self) -> Option<&[Uuid]> {
        match self {
            AppError::Incomplete { missing } => Some(missing),
            _ => None,
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Forbidden(ref msg) => msg.clone(),
            AppError::Unauthorized(ref msg) => msg.clone(),
            AppError::Incomplete { missing } => {
                format!("Upload incomplete: {} file(s) not yet written", missing.len())
            }
            AppError::SizeMismatch {
                file_id,
                declared,
                observed,
            } => format!(
                "Size mismatch for file {}: declared {} bytes, observed {}",
                file_id, declared, observed
            ),
            AppError::AlreadyWritten(ref msg) => msg.clone(),
            AppError::Expired(ref msg) => msg.clone(),
            AppError::PartialFailure(_) => "Archive streaming failed".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}
