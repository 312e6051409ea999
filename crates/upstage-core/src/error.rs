//! Error types module
//!
//! Every failure the upload protocol can produce is a variant of [`AppError`].
//! The HTTP status, error code, retryability and log level of each variant live in
//! one table, [`app_error_static_metadata`], so the API layer never picks a status
//! code on its own.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use chrono::{DateTime, Utc};
use std::io;
use std::time::Duration;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected client errors (validation, conflicts, not found)
    Debug,
    /// Recoverable or suspicious conditions (timeouts, auth failures)
    Warn,
    /// Unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "IDEMPOTENCY_CONFLICT")
    fn error_code(&self) -> &'static str;

    /// Whether the client can retry (possibly after fixing the request)
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

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Too many requests, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Idempotency key was already used with different parameters")]
    IdempotencyConflict,

    #[error("Content has not been uploaded yet")]
    NotUploaded,

    #[error("Upload window closed at {expired_at}")]
    UploadExpired { expired_at: DateTime<Utc> },

    #[error("Uploaded size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: i64, actual: i64 },

    #[error("Content type mismatch: expected {expected}, got {actual}")]
    ContentTypeMismatch { expected: String, actual: String },

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

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
        AppError::Validation(err.to_string())
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
///
/// This is the single status table for the service. Client-recoverable protocol
/// errors log at debug; only storage, database and internal failures log at error.
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
            false,
            Some("Retry the idempotent request"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            false,
            Some("Retry the idempotent request"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            true,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::Validation(_) => (
            400,
            "VALIDATION_ERROR",
            true,
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
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Check API key"),
            false,
            LogLevel::Warn,
        ),
        AppError::Forbidden(_) => (
            403,
            "FORBIDDEN",
            false,
            Some("Use the endpoint matching the asset purpose"),
            false,
            LogLevel::Warn,
        ),
        AppError::RateLimited { .. } => (
            429,
            "RATE_LIMITED",
            true,
            Some("Wait for the Retry-After interval and retry"),
            false,
            LogLevel::Debug,
        ),
        AppError::IdempotencyConflict => (
            409,
            "IDEMPOTENCY_CONFLICT",
            true,
            Some("Use a new idempotency key for different parameters"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotUploaded => (
            409,
            "NOT_UPLOADED",
            true,
            Some("Upload the content before completing"),
            false,
            LogLevel::Debug,
        ),
        AppError::UploadExpired { .. } => (
            409,
            "UPLOAD_EXPIRED",
            false,
            Some("Create a new upload"),
            false,
            LogLevel::Debug,
        ),
        AppError::SizeMismatch { .. } => (
            400,
            "SIZE_MISMATCH",
            true,
            Some("Upload exactly the declared number of bytes"),
            false,
            LogLevel::Debug,
        ),
        AppError::ContentTypeMismatch { .. } => (
            409,
            "CONTENT_TYPE_MISMATCH",
            true,
            Some("Upload with the declared Content-Type"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            true,
            Some("Reduce file size"),
            false,
            LogLevel::Debug,
        ),
        AppError::Timeout(_) => (
            503,
            "TIMEOUT",
            true,
            Some("Retry after a short delay"),
            false,
            LogLevel::Warn,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            false,
            Some("Retry the idempotent request"),
            true,
            LogLevel::Error,
        ),
        AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            false,
            Some("Retry the idempotent request"),
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
            AppError::Validation(_) => "Validation",
            AppError::NotFound(_) => "NotFound",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::RateLimited { .. } => "RateLimited",
            AppError::IdempotencyConflict => "IdempotencyConflict",
            AppError::NotUploaded => "NotUploaded",
            AppError::UploadExpired { .. } => "UploadExpired",
            AppError::SizeMismatch { .. } => "SizeMismatch",
            AppError::ContentTypeMismatch { .. } => "ContentTypeMismatch",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::Timeout(_) => "Timeout",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Seconds a rate-limited client should wait, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AppError::RateLimited { retry_after } => {
                let millis = retry_after.as_millis() as u64;
                Some(millis.div_ceil(1000).max(1))
            }
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
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
            AppError::InvalidInput(ref msg)
            | AppError::Validation(ref msg)
            | AppError::NotFound(ref msg)
            | AppError::Unauthorized(ref msg)
            | AppError::Forbidden(ref msg)
            | AppError::PayloadTooLarge(ref msg)
            | AppError::Timeout(ref msg) => msg.clone(),
            AppError::RateLimited { .. }
            | AppError::IdempotencyConflict
            | AppError::NotUploaded
            | AppError::UploadExpired { .. }
            | AppError::SizeMismatch { .. }
            | AppError::ContentTypeMismatch { .. } => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert_eq!(err.client_message(), "Failed to access database");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_protocol_errors_map_to_client_statuses() {
        let cases: Vec<(AppError, u16, &str)> = vec![
            (
                AppError::Validation("fileName is required".into()),
                400,
                "VALIDATION_ERROR",
            ),
            (
                AppError::RateLimited {
                    retry_after: Duration::from_millis(120),
                },
                429,
                "RATE_LIMITED",
            ),
            (AppError::IdempotencyConflict, 409, "IDEMPOTENCY_CONFLICT"),
            (AppError::NotUploaded, 409, "NOT_UPLOADED"),
            (
                AppError::UploadExpired {
                    expired_at: Utc::now(),
                },
                409,
                "UPLOAD_EXPIRED",
            ),
            (
                AppError::SizeMismatch {
                    expected: 12,
                    actual: 11,
                },
                400,
                "SIZE_MISMATCH",
            ),
            (
                AppError::ContentTypeMismatch {
                    expected: "image/png".into(),
                    actual: "image/jpeg".into(),
                },
                409,
                "CONTENT_TYPE_MISMATCH",
            ),
            (AppError::NotFound("asset not found".into()), 404, "NOT_FOUND"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.http_status_code(), status, "{}", err);
            assert_eq!(err.error_code(), code);
            assert_eq!(err.log_level(), LogLevel::Debug, "{} must not log as error", err);
            assert!(!err.is_sensitive());
        }
    }

    #[test]
    fn test_timeout_is_retryable_service_unavailable() {
        let err = AppError::Timeout("storage write timed out".into());
        assert_eq!(err.http_status_code(), 503);
        assert!(err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_storage_error_is_sensitive() {
        let err = AppError::Storage("disk full".into());
        assert_eq!(err.http_status_code(), 500);
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Failed to access storage");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let err = AppError::RateLimited {
            retry_after: Duration::from_millis(1),
        };
        assert_eq!(err.retry_after_secs(), Some(1));

        let err = AppError::RateLimited {
            retry_after: Duration::from_millis(2500),
        };
        assert_eq!(err.retry_after_secs(), Some(3));

        assert_eq!(AppError::NotUploaded.retry_after_secs(), None);
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("root cause").context("while staging"));
        let detailed = err.detailed_message();
        assert!(detailed.contains("Internal error with source"));
        assert!(detailed.contains("Caused by"));
    }
}
