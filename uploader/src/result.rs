//! Upload outcomes and the log sink that reports them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};

/// How an upload attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    /// The object was stored.
    Success,

    /// No usable credentials; not retried.
    CredentialsMissing,

    /// An attempt failed and will be retried.
    TransientError,

    /// Gave up on this version of the file.
    PermanentError,
}

impl UploadOutcome {
    /// Whether no further attempts follow for this settled event.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::TransientError)
    }
}

/// Whether a successful upload created or replaced the remote object, as far
/// as this process knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadAction {
    Uploaded,
    Updated,
}

/// Report for one upload attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Local file.
    pub path: PathBuf,

    /// How it ended.
    pub outcome: UploadOutcome,

    /// Key the file was (or would have been) stored under.
    pub remote_key: String,

    /// Target bucket.
    pub bucket: String,

    /// Attempts made so far.
    pub attempts: u32,

    /// Set for successful uploads.
    pub action: Option<UploadAction>,

    /// Error description for failures.
    pub detail: Option<String>,

    /// When the result was produced.
    pub completed_at: DateTime<Utc>,
}

impl UploadResult {
    /// A successful upload.
    pub fn success(
        path: &Path,
        bucket: &str,
        remote_key: &str,
        attempts: u32,
        action: UploadAction,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome: UploadOutcome::Success,
            remote_key: remote_key.to_string(),
            bucket: bucket.to_string(),
            attempts,
            action: Some(action),
            detail: None,
            completed_at: Utc::now(),
        }
    }

    /// A failed attempt sequence.
    pub fn failure(
        path: &Path,
        bucket: &str,
        remote_key: &str,
        attempts: u32,
        outcome: UploadOutcome,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome,
            remote_key: remote_key.to_string(),
            bucket: bucket.to_string(),
            attempts,
            action: None,
            detail: Some(detail.into()),
            completed_at: Utc::now(),
        }
    }

    /// The local file name, for messages.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// The single place upload results are turned into log lines.
///
/// Missing credentials are a configuration problem shared by every upload,
/// so only the first occurrence is logged at error level.
#[derive(Debug, Default)]
pub struct ResultLog {
    credentials_reported: bool,
}

impl ResultLog {
    /// Log every result until the channel closes.
    pub async fn drain(mut self, mut results: mpsc::UnboundedReceiver<UploadResult>) {
        while let Some(result) = results.recv().await {
            self.record(&result);
        }
    }

    /// Log one result.
    pub fn record(&mut self, result: &UploadResult) {
        let name = result.file_name();
        let bucket = &result.bucket;
        let detail = result.detail.as_deref().unwrap_or_default();

        let level = self.severity(result);

        match result.outcome {
            UploadOutcome::Success => {
                let verb = match result.action {
                    Some(UploadAction::Updated) => "Updated",
                    _ => "Uploaded",
                };
                info!("{verb}: {name} to {bucket}.");
            }
            UploadOutcome::CredentialsMissing if level == Level::ERROR => {
                error!("Credentials not available for S3 upload of {name} to {bucket}: {detail}");
            }
            UploadOutcome::CredentialsMissing => {
                debug!("Skipped {name}: credentials still unavailable for {bucket}");
            }
            UploadOutcome::TransientError => {
                debug!(
                    "Attempt {} for {name} to {bucket} failed, retrying: {detail}",
                    result.attempts
                );
            }
            UploadOutcome::PermanentError => {
                warn!(
                    "Failed to upload {name} to {bucket} after {} attempt(s): {detail}",
                    result.attempts
                );
            }
        }
    }

    /// Level `result` is reported at. Marks credentials as reported.
    pub fn severity(&mut self, result: &UploadResult) -> Level {
        match result.outcome {
            UploadOutcome::Success => Level::INFO,
            UploadOutcome::TransientError => Level::DEBUG,
            UploadOutcome::PermanentError => Level::WARN,
            UploadOutcome::CredentialsMissing if self.credentials_reported => Level::DEBUG,
            UploadOutcome::CredentialsMissing => {
                self.credentials_reported = true;
                Level::ERROR
            }
        }
    }
}
