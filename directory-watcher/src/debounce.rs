//! Per-path debouncing.
//!
//! Editors often save a file in several small flushes. Each flush produces
//! an event; the queue keeps one entry per path and only releases it once
//! the file has been quiet for the configured window.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DebounceConfig;
use crate::event::WatchEvent;

/// A file waiting for its upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    /// Absolute path of the file.
    pub path: PathBuf,

    /// When the most recent event for this path was recorded.
    pub last_event_time: Instant,

    /// Upload attempts made so far.
    pub attempt_count: u32,
}

impl PendingUpload {
    /// A fresh entry with no attempts.
    pub fn new(path: impl Into<PathBuf>, last_event_time: Instant) -> Self {
        Self {
            path: path.into(),
            last_event_time,
            attempt_count: 0,
        }
    }
}

/// Coalesces bursts of events into one settled entry per path.
#[derive(Debug)]
pub struct DebouncedQueue {
    config: DebounceConfig,
    pending: HashMap<PathBuf, PendingUpload>,
}

impl DebouncedQueue {
    /// Create an empty queue.
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
        }
    }

    /// Record an event as happening now.
    pub fn record_event(&mut self, event: WatchEvent) {
        self.record_at(event, Instant::now());
    }

    /// Record an event observed at `at`. An existing entry for the same path
    /// only has its timestamp moved forward.
    pub fn record_at(&mut self, event: WatchEvent, at: Instant) {
        self.pending
            .entry(event.path)
            .and_modify(|entry| {
                if at > entry.last_event_time {
                    entry.last_event_time = at;
                }
            })
            .or_insert_with_key(|path| PendingUpload::new(path.clone(), at));
    }

    /// Remove and return every entry that has been quiet for at least the
    /// quiescence window, oldest first.
    pub fn take_settled(&mut self, now: Instant) -> Vec<PendingUpload> {
        let window = self.config.quiescence;
        let ready: Vec<PathBuf> = self
            .pending
            .values()
            .filter(|entry| now.saturating_duration_since(entry.last_event_time) >= window)
            .map(|entry| entry.path.clone())
            .collect();

        let mut settled: Vec<PendingUpload> = ready
            .iter()
            .filter_map(|path| self.pending.remove(path))
            .collect();
        settled.sort_by_key(|entry| entry.last_event_time);
        settled
    }

    /// Remove and return every entry regardless of age.
    pub fn take_all(&mut self) -> Vec<PendingUpload> {
        let mut all: Vec<PendingUpload> = self.pending.drain().map(|(_, entry)| entry).collect();
        all.sort_by_key(|entry| entry.last_event_time);
        all
    }

    /// Whether `path` has a pending entry.
    pub fn contains(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drive the queue until `shutdown` fires or `events` closes.
    ///
    /// Settled entries go to `settled`. On exit, events still buffered in
    /// `events` are recorded, then the remaining entries are flushed or
    /// dropped according to [`DebounceConfig::flush_on_shutdown`].
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<WatchEvent>,
        settled: mpsc::Sender<PendingUpload>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                // Ahead of `events` so a busy channel cannot starve settling.
                _ = ticker.tick() => {
                    let ready = self.take_settled(Instant::now());
                    if !emit(ready, &settled).await {
                        debug!("Settled receiver closed, stopping debounce loop");
                        return;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.record_event(event),
                    None => {
                        debug!("Event source closed");
                        break;
                    }
                },
            }
        }

        // Events already accepted by the watcher still count.
        events.close();
        while let Ok(event) = events.try_recv() {
            self.record_event(event);
        }

        if self.config.flush_on_shutdown {
            let remaining = self.take_all();
            if !remaining.is_empty() {
                info!("Flushing {} pending file(s) on shutdown", remaining.len());
            }
            emit(remaining, &settled).await;
        } else if !self.is_empty() {
            info!("Dropping {} pending file(s) on shutdown", self.len());
            self.pending.clear();
        }
    }
}

/// Send entries downstream, skipping files that disappeared while pending.
/// Returns false once the receiver is gone.
async fn emit(entries: Vec<PendingUpload>, settled: &mpsc::Sender<PendingUpload>) -> bool {
    for entry in entries {
        match tokio::fs::metadata(&entry.path).await {
            Ok(metadata) if !metadata.is_file() => {
                debug!("Skipping {}: no longer a regular file", entry.path.display());
                continue;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Skipping {}: deleted before settling", entry.path.display());
                continue;
            }
            Err(e) => {
                warn!("Failed to stat {}: {e}", entry.path.display());
            }
        }

        if settled.send(entry).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WatchEventKind;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config() -> DebounceConfig {
        DebounceConfig::default()
    }

    fn modified(path: &Path) -> WatchEvent {
        WatchEvent::new(WatchEventKind::Modified, path)
    }

    #[test]
    fn test_burst_coalesces_into_one_entry() {
        let mut queue = DebouncedQueue::new(config());
        let start = Instant::now();
        let path = Path::new("/drop/a.txt");

        for i in 0..10 {
            queue.record_at(modified(path), start + Duration::from_millis(i * 50));
        }

        assert_eq!(queue.len(), 1);
        assert!(queue.take_settled(start + Duration::from_millis(900)).is_empty());

        let settled = queue.take_settled(start + Duration::from_millis(1450));
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].path, path);
        assert_eq!(settled[0].last_event_time, start + Duration::from_millis(450));
        assert_eq!(settled[0].attempt_count, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_new_event_resets_quiescence() {
        let mut queue = DebouncedQueue::new(config());
        let start = Instant::now();
        let path = Path::new("/drop/a.txt");

        queue.record_at(modified(path), start);
        queue.record_at(modified(path), start + Duration::from_millis(800));

        assert!(queue.take_settled(start + Duration::from_millis(1000)).is_empty());
        assert!(queue.contains(path));
        assert_eq!(
            queue.take_settled(start + Duration::from_millis(1800)).len(),
            1
        );
    }

    #[test]
    fn test_paths_settle_independently() {
        let mut queue = DebouncedQueue::new(config());
        let start = Instant::now();

        queue.record_at(modified(Path::new("/drop/early.txt")), start);
        queue.record_at(
            modified(Path::new("/drop/late.txt")),
            start + Duration::from_millis(700),
        );

        let settled = queue.take_settled(start + Duration::from_millis(1000));
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].path, Path::new("/drop/early.txt"));
        assert!(queue.contains(Path::new("/drop/late.txt")));
    }

    #[tokio::test]
    async fn test_deleted_file_is_not_emitted() {
        let temp_dir = TempDir::new().unwrap();
        let kept = temp_dir.path().join("kept.txt");
        let gone = temp_dir.path().join("gone.txt");
        std::fs::write(&kept, b"kept").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let now = Instant::now();
        let open = emit(
            vec![PendingUpload::new(&gone, now), PendingUpload::new(&kept, now)],
            &tx,
        )
        .await;
        drop(tx);

        assert!(open);
        assert_eq!(rx.recv().await.map(|p| p.path), Some(kept));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_run_emits_after_quiescence() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("report.csv");
        std::fs::write(&file, b"a,b\n").unwrap();

        let queue = DebouncedQueue::new(
            config()
                .with_quiescence(Duration::from_millis(100))
                .with_tick(Duration::from_millis(20)),
        );
        let (event_tx, event_rx) = mpsc::channel(16);
        let (settled_tx, mut settled_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(queue.run(event_rx, settled_tx, shutdown.clone()));

        for _ in 0..5 {
            event_tx.send(modified(&file)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let first = tokio::time::timeout(Duration::from_secs(2), settled_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.path, file);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(settled_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_entries() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("late.txt");
        std::fs::write(&file, b"late").unwrap();

        let queue = DebouncedQueue::new(config().with_quiescence(Duration::from_secs(60)));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (settled_tx, mut settled_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(queue.run(event_rx, settled_tx, shutdown.clone()));

        event_tx.send(modified(&file)).await.unwrap();
        drop(event_tx);
        handle.await.unwrap();

        assert_eq!(settled_rx.recv().await.map(|p| p.path), Some(file));
        assert_eq!(settled_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_can_drop_pending_entries() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("late.txt");
        std::fs::write(&file, b"late").unwrap();

        let queue = DebouncedQueue::new(
            config()
                .with_quiescence(Duration::from_secs(60))
                .flush_on_shutdown(false),
        );
        let (event_tx, event_rx) = mpsc::channel(16);
        let (settled_tx, mut settled_rx) = mpsc::channel(16);
        let handle = tokio::spawn(queue.run(event_rx, settled_tx, CancellationToken::new()));

        event_tx.send(modified(&file)).await.unwrap();
        drop(event_tx);
        handle.await.unwrap();

        assert_eq!(settled_rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_quiet_path_settles_while_another_is_busy() {
        let temp_dir = TempDir::new().unwrap();
        let quiet = temp_dir.path().join("quiet.txt");
        let busy = temp_dir.path().join("busy.txt");
        std::fs::write(&quiet, b"done").unwrap();
        std::fs::write(&busy, b"growing").unwrap();

        let queue = DebouncedQueue::new(
            config()
                .with_quiescence(Duration::from_millis(50))
                .with_tick(Duration::from_millis(20)),
        );
        let (event_tx, event_rx) = mpsc::channel(4);
        let (settled_tx, mut settled_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(queue.run(event_rx, settled_tx, shutdown.clone()));

        event_tx.send(modified(&quiet)).await.unwrap();

        let mut writers = Vec::new();
        for _ in 0..3 {
            let event_tx = event_tx.clone();
            let busy = busy.clone();
            writers.push(tokio::spawn(async move {
                while event_tx.send(modified(&busy)).await.is_ok() {}
            }));
        }
        drop(event_tx);

        let first = tokio::time::timeout(Duration::from_secs(1), settled_rx.recv())
            .await
            .expect("quiet file did not settle")
            .unwrap();
        assert_eq!(first.path, quiet);

        shutdown.cancel();
        handle.await.unwrap();
        for writer in writers {
            writer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_shutdown_flushes_buffered_events() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("buffered.txt");
        std::fs::write(&file, b"x").unwrap();

        let queue = DebouncedQueue::new(config());
        let (event_tx, event_rx) = mpsc::channel(16);
        let (settled_tx, mut settled_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        event_tx.send(modified(&file)).await.unwrap();
        shutdown.cancel();
        queue.run(event_rx, settled_tx, shutdown).await;

        assert_eq!(settled_rx.recv().await.map(|p| p.path), Some(file));
        assert_eq!(settled_rx.recv().await, None);
    }
}
