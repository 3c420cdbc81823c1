//! Error types for the upload monitor.

use s3watch_directory_watcher::WatcherError;
use s3watch_object_store::UploadError;
use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that stop the monitor from starting or running.
///
/// Per-file upload failures are never reported through this type; they are
/// delivered as [`UploadResult`](crate::result::UploadResult)s instead.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// A required setting is absent.
    #[error("missing required setting {0}")]
    MissingSetting(&'static str),

    /// A setting could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidSetting {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// The bucket could not be reached at startup.
    #[error("bucket {bucket} is not usable: {source}")]
    BucketUnavailable {
        bucket: String,
        #[source]
        source: UploadError,
    },

    /// Watch directory or ignore rules are unusable.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// A pipeline task panicked or was aborted.
    #[error("monitor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl MonitorError {
    /// Whether this is a startup configuration problem.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Task(_))
    }
}
