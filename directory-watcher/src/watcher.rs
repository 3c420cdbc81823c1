//! Directory watcher implementation.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::error::{Result, WatcherError};
use crate::event::{WatchEvent, WatchEventKind};

/// Entry point for subscribing to file events in a directory.
pub struct DirectoryWatcher;

impl DirectoryWatcher {
    /// Start watching `config.path`.
    ///
    /// The returned subscription yields events until [`WatchSubscription::stop`]
    /// is called or it is dropped. A stopped subscription cannot be restarted;
    /// subscribe again instead.
    pub fn subscribe(config: WatchConfig) -> Result<WatchSubscription> {
        let path = config.path.clone();

        if !path.exists() {
            return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
        }
        if !path.is_dir() {
            return Err(WatcherError::NotADirectory(path.display().to_string()));
        }
        let path = path.canonicalize()?;

        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(kind) = WatchEventKind::from_notify(&event.kind) else {
                        return;
                    };

                    // A combined rename reports [from, to]; only the target
                    // still exists.
                    let paths: Vec<PathBuf> = match event.kind {
                        notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                            event.paths.last().cloned().into_iter().collect()
                        }
                        _ => event.paths,
                    };

                    for path in paths {
                        if path.is_dir() {
                            continue;
                        }

                        if event_tx
                            .blocking_send(WatchEvent::capture(kind, &path))
                            .is_err()
                        {
                            debug!("Dropping event for {}: subscriber gone", path.display());
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {e}");
                }
            },
        )?;

        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&path, mode)?;

        info!("Monitoring {} for new files...", path.display());

        Ok(WatchSubscription {
            path,
            watcher: Some(watcher),
            event_rx,
        })
    }
}

/// A live stream of [`WatchEvent`]s for one directory.
pub struct WatchSubscription {
    /// Canonical path of the watched directory.
    path: PathBuf,

    /// Internal notify watcher; `None` once stopped.
    watcher: Option<RecommendedWatcher>,

    /// Events produced by the notify thread.
    event_rx: mpsc::Receiver<WatchEvent>,
}

impl WatchSubscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription has been stopped and every
    /// buffered event has been handed out.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }

    /// Stop delivering new events. Events already buffered are still returned
    /// by [`next`](Self::next).
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.path) {
                warn!("Failed to unwatch {}: {e}", self.path.display());
            }
            info!("Stopped watching {}", self.path.display());
        }
    }

    /// Whether the subscription still accepts new events.
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// The watched directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_subscribe_nonexistent_directory() {
        let result = DirectoryWatcher::subscribe(WatchConfig::new("/nonexistent/path/12345"));
        assert!(matches!(result, Err(WatcherError::DirectoryNotFound(_))));
    }

    #[tokio::test]
    async fn test_subscribe_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();

        let result = DirectoryWatcher::subscribe(WatchConfig::new(&file));
        assert!(matches!(result, Err(WatcherError::NotADirectory(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_created_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let mut subscription =
            DirectoryWatcher::subscribe(WatchConfig::new(temp_dir.path())).unwrap();
        assert!(subscription.is_running());

        let file = subscription.path().join("report.csv");
        std::fs::write(&file, b"a,b,c\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .expect("no event within timeout")
            .expect("subscription closed");
        assert_eq!(event.path, file);

        subscription.stop();
        assert!(!subscription.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_directories_are_not_reported() {
        let temp_dir = TempDir::new().unwrap();
        let mut subscription =
            DirectoryWatcher::subscribe(WatchConfig::new(temp_dir.path())).unwrap();

        std::fs::create_dir(subscription.path().join("nested")).unwrap();
        let file = subscription.path().join("after.txt");
        std::fs::write(&file, b"1").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .expect("no event within timeout")
            .expect("subscription closed");
        assert_eq!(event.path, file);
    }
}
