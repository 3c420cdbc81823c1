//! Per-path upload scheduling.
//!
//! Each settled file gets a worker task. While a worker runs, further
//! settled events for the same path are parked and coalesced; the worker
//! picks the parked event up once its current upload finishes. Workers for
//! different paths run concurrently, bounded by a semaphore.
//!
//! ```text
//! Idle ──► Pending ──► InFlight ──► Idle
//!                        │  ▲
//!                        ▼  │
//!                      Retrying
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use s3watch_directory_watcher::PendingUpload;
use s3watch_object_store::{ByteStream, ObjectStore, UploadError};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::result::{UploadAction, UploadOutcome, UploadResult};
use crate::retry::RetryPolicy;

/// Default cap on concurrent uploads.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Settings for the upload coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Target bucket.
    pub bucket: String,

    /// Prepended to every remote key.
    pub key_prefix: String,

    /// Concurrent uploads across all paths; 0 means no cap.
    pub max_concurrency: usize,

    /// Backoff for transient failures.
    pub retry: RetryPolicy,
}

impl CoordinatorConfig {
    /// Defaults for `bucket`.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: String::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the concurrency cap.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Remote key for `path`: the file's base name, flat namespace.
    pub fn remote_key(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_string_lossy();
        Some(format!("{}{name}", self.key_prefix))
    }
}

/// Serializes uploads per path and runs them against an [`ObjectStore`].
#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<Inner>,
    tracker: TaskTracker,
    abort: CancellationToken,
}

struct Inner {
    store: Arc<dyn ObjectStore>,
    config: CoordinatorConfig,
    limiter: Semaphore,

    /// Paths with a running worker, mapped to the event parked behind it.
    slots: Mutex<HashMap<PathBuf, Option<PendingUpload>>>,

    /// Paths uploaded successfully at least once by this process.
    seen: Mutex<HashSet<PathBuf>>,

    results: mpsc::UnboundedSender<UploadResult>,
}

/// What was found when opening a file for upload.
enum Body {
    Ready(ByteStream),
    Deleted,
    Unreadable(String),
}

impl UploadCoordinator {
    /// Create a coordinator and the channel its results are delivered on.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: CoordinatorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<UploadResult>) {
        let (results, results_rx) = mpsc::unbounded_channel();
        let permits = match config.max_concurrency {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };

        let coordinator = Self {
            inner: Arc::new(Inner {
                store,
                config,
                limiter: Semaphore::new(permits),
                slots: Mutex::new(HashMap::new()),
                seen: Mutex::new(HashSet::new()),
                results,
            }),
            tracker: TaskTracker::new(),
            abort: CancellationToken::new(),
        };

        (coordinator, results_rx)
    }

    /// Accept a settled file.
    ///
    /// Starts a worker unless one is already running for the path, in which
    /// case the event replaces whatever was parked behind that worker.
    pub async fn handle_settled(&self, pending: PendingUpload) {
        if self.tracker.is_closed() {
            warn!(
                "Coordinator shutting down, ignoring {}",
                pending.path.display()
            );
            return;
        }

        {
            let mut slots = self.inner.slots.lock().await;
            if let Some(parked) = slots.get_mut(&pending.path) {
                debug!(
                    "Upload of {} in flight, queueing follow-up",
                    pending.path.display()
                );
                *parked = Some(pending);
                return;
            }
            slots.insert(pending.path.clone(), None);
        }

        let inner = self.inner.clone();
        let abort = self.abort.clone();
        self.tracker.spawn(inner.drive(pending, abort));
    }

    /// Whether a worker is running for `path`.
    pub async fn is_in_flight(&self, path: &Path) -> bool {
        self.inner.slots.lock().await.contains_key(path)
    }

    /// Number of running workers.
    pub fn active_workers(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait for running uploads. Uploads still
    /// running after `grace` are cancelled.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                "{} upload(s) still running after {grace:?}, cancelling",
                self.tracker.len()
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }
    }
}

impl Inner {
    /// Worker loop for one path.
    async fn drive(self: Arc<Self>, mut pending: PendingUpload, abort: CancellationToken) {
        loop {
            let path = pending.path.clone();

            tokio::select! {
                _ = abort.cancelled() => {
                    warn!("Cancelled upload of {}", path.display());
                    self.slots.lock().await.remove(&path);
                    return;
                }
                _ = self.process(&mut pending) => {}
            }

            let mut slots = self.slots.lock().await;
            match slots.get_mut(&path).and_then(Option::take) {
                Some(next) => pending = next,
                None => {
                    slots.remove(&path);
                    return;
                }
            }
        }
    }

    /// Upload one settled event, retrying transient failures.
    async fn process(&self, pending: &mut PendingUpload) {
        let bucket = self.config.bucket.as_str();
        let Some(key) = self.config.remote_key(&pending.path) else {
            warn!("Cannot derive a remote key for {}", pending.path.display());
            return;
        };

        loop {
            let Ok(permit) = self.limiter.acquire().await else {
                return;
            };
            pending.attempt_count += 1;
            let attempts = pending.attempt_count;

            let body = match open_body(&pending.path).await {
                Body::Ready(body) => body,
                Body::Deleted => {
                    debug!("{} deleted before upload, skipping", pending.path.display());
                    return;
                }
                Body::Unreadable(cause) => {
                    self.report(UploadResult::failure(
                        &pending.path,
                        bucket,
                        &key,
                        attempts,
                        UploadOutcome::PermanentError,
                        cause,
                    ));
                    return;
                }
            };

            let err = match self.store.put(bucket, &key, body).await {
                Ok(()) => {
                    let action = self.mark_seen(&pending.path).await;
                    self.report(UploadResult::success(
                        &pending.path,
                        bucket,
                        &key,
                        attempts,
                        action,
                    ));
                    return;
                }
                Err(err) => err,
            };

            match err {
                UploadError::Transient(cause) if self.config.retry.should_retry(attempts) => {
                    let delay = self.config.retry.delay_for(attempts);
                    self.report(UploadResult::failure(
                        &pending.path,
                        bucket,
                        &key,
                        attempts,
                        UploadOutcome::TransientError,
                        format!("{cause} (retrying in {delay:?})"),
                    ));
                    drop(permit);
                    tokio::time::sleep(delay).await;
                }
                UploadError::Transient(cause) => {
                    self.report(UploadResult::failure(
                        &pending.path,
                        bucket,
                        &key,
                        attempts,
                        UploadOutcome::PermanentError,
                        format!("giving up after {attempts} attempt(s): {cause}"),
                    ));
                    return;
                }
                UploadError::CredentialsMissing => {
                    self.report(UploadResult::failure(
                        &pending.path,
                        bucket,
                        &key,
                        attempts,
                        UploadOutcome::CredentialsMissing,
                        UploadError::CredentialsMissing.to_string(),
                    ));
                    return;
                }
                err @ (UploadError::NotFound(_) | UploadError::Permanent(_)) => {
                    self.report(UploadResult::failure(
                        &pending.path,
                        bucket,
                        &key,
                        attempts,
                        UploadOutcome::PermanentError,
                        err.to_string(),
                    ));
                    return;
                }
            }
        }
    }

    /// Record a successful upload of `path`.
    async fn mark_seen(&self, path: &Path) -> UploadAction {
        if self.seen.lock().await.insert(path.to_path_buf()) {
            UploadAction::Uploaded
        } else {
            UploadAction::Updated
        }
    }

    /// Hand a result to the sink.
    fn report(&self, result: UploadResult) {
        if self.results.send(result).is_err() {
            debug!("Result receiver dropped");
        }
    }
}

/// Open `path` as a stream. Content is read lazily while the request body is
/// sent, so the bytes are whatever the file holds at dispatch time.
async fn open_body(path: &Path) -> Body {
    match ByteStream::from_path(path).await {
        Ok(body) => Body::Ready(body),
        Err(e) => match tokio::fs::try_exists(path).await {
            Ok(false) => Body::Deleted,
            _ => Body::Unreadable(format!("failed to read {}: {e}", path.display())),
        },
    }
}
