//! Wires the watcher, ignore filter, debounce queue and coordinator together.

use std::sync::Arc;

use s3watch_directory_watcher::{DebouncedQueue, DirectoryWatcher, IgnoreFilter};
use s3watch_object_store::{ObjectStore, UploadError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::coordinator::UploadCoordinator;
use crate::error::{MonitorError, Result};
use crate::result::UploadResult;

/// The upload pipeline for one watched directory.
pub struct UploadMonitor {
    config: MonitorConfig,
    store: Arc<dyn ObjectStore>,
}

impl UploadMonitor {
    /// Create a monitor that uploads through `store`.
    pub fn new(config: MonitorConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, store }
    }

    /// Validate the configuration and start the pipeline.
    ///
    /// Returns once the directory is being watched. The pipeline runs until
    /// `shutdown` is cancelled; [`MonitorHandle::wait`] resolves after the
    /// shutdown sequence has finished.
    pub async fn start(self, shutdown: CancellationToken) -> Result<MonitorHandle> {
        let Self { config, store } = self;
        let bucket = config.bucket().to_string();

        let filter = IgnoreFilter::new(&config.ignore)?;

        if config.verify_bucket {
            check_bucket(store.as_ref(), &bucket, config.s3.credentials.is_some()).await?;
        }

        let mut subscription = DirectoryWatcher::subscribe(config.watch.clone())?;
        let capacity = config.watch.channel_capacity;

        let store_name = store.name().to_string();
        let (coordinator, results) = UploadCoordinator::new(store, config.coordinator.clone());
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (settled_tx, mut settled_rx) = mpsc::channel(capacity);

        // Filter stage: raw watcher events in, uploadable events out.
        let forward = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                loop {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => break,
                        event = subscription.next() => {
                            let Some(event) = event else { break };
                            if filter.should_ignore_event(&event) {
                                debug!("Ignoring {}", event.path.display());
                                continue;
                            }
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                subscription.stop();
            }
        });

        let debounce = tokio::spawn(DebouncedQueue::new(config.debounce).run(
            event_rx,
            settled_tx,
            shutdown.clone(),
        ));

        let grace = config.shutdown_grace;
        let task = tokio::spawn(async move {
            while let Some(pending) = settled_rx.recv().await {
                coordinator.handle_settled(pending).await;
            }

            for (name, handle) in [("watcher", forward), ("debounce", debounce)] {
                if let Err(e) = handle.await {
                    error!("The {name} task failed: {e}");
                }
            }

            coordinator.shutdown(grace).await;
            info!("Upload monitor stopped");
        });

        info!("Uploading settled files to bucket {bucket} via {store_name}");

        Ok(MonitorHandle {
            results: Some(results),
            task,
        })
    }
}

/// Startup check of the target bucket. Credential problems only warn.
async fn check_bucket(
    store: &dyn ObjectStore,
    bucket: &str,
    has_credentials: bool,
) -> Result<()> {
    match store.probe(bucket).await {
        Ok(()) => {
            debug!("Bucket {bucket} is reachable via {}", store.name());
            Ok(())
        }
        Err(UploadError::CredentialsMissing) if has_credentials => {
            warn!("Credentials rejected by {} for bucket {bucket}", store.name());
            Ok(())
        }
        Err(UploadError::CredentialsMissing) => {
            warn!("No credentials configured, skipping check of bucket {bucket}");
            Ok(())
        }
        Err(source) => Err(MonitorError::BucketUnavailable {
            bucket: bucket.to_string(),
            source,
        }),
    }
}

/// A running [`UploadMonitor`].
pub struct MonitorHandle {
    results: Option<mpsc::UnboundedReceiver<UploadResult>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Take the stream of upload results. Returns `None` after the first call.
    pub fn take_results(&mut self) -> Option<mpsc::UnboundedReceiver<UploadResult>> {
        self.results.take()
    }

    /// Wait for the pipeline to finish its shutdown sequence.
    pub async fn wait(self) -> Result<()> {
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use s3watch_object_store::ByteStream;
    use tracing_test::traced_test;

    /// Answers every probe with the same error.
    struct ProbeStore(Option<UploadError>);

    #[async_trait]
    impl ObjectStore for ProbeStore {
        fn name(&self) -> &str {
            "probe-only"
        }

        async fn put(
            &self,
            _bucket: &str,
            _key: &str,
            _body: ByteStream,
        ) -> s3watch_object_store::Result<()> {
            Ok(())
        }

        async fn probe(&self, _bucket: &str) -> s3watch_object_store::Result<()> {
            match &self.0 {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn test_rejected_credentials_are_not_reported_as_missing() {
        let store = ProbeStore(Some(UploadError::CredentialsMissing));

        check_bucket(&store, "drop", true).await.unwrap();

        assert!(logs_contain("Credentials rejected by probe-only for bucket drop"));
        assert!(!logs_contain("No credentials configured"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_absent_credentials_skip_the_check() {
        let store = ProbeStore(Some(UploadError::CredentialsMissing));

        check_bucket(&store, "drop", false).await.unwrap();

        assert!(logs_contain("No credentials configured"));
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_startup() {
        let store = ProbeStore(Some(UploadError::NotFound("drop".to_string())));

        let err = check_bucket(&store, "drop", true).await.unwrap_err();

        assert!(matches!(err, MonitorError::BucketUnavailable { .. }));
        assert!(err.is_configuration());
    }
}
