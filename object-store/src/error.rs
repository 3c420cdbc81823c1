//! Error types for object store operations.

use thiserror::Error;

/// Result type alias for object store operations.
pub type Result<T> = std::result::Result<T, UploadError>;

/// Why a single upload attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// No usable credentials: none configured, or rejected by the endpoint.
    #[error("credentials not available for S3 upload")]
    CredentialsMissing,

    /// The target bucket does not exist.
    #[error("bucket not found: {0}")]
    NotFound(String),

    /// Worth retrying: timeouts, throttling, connection failures, 5xx.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("permanent storage error: {0}")]
    Permanent(String),
}

impl UploadError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
