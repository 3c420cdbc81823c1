//! Test support: an in-memory object store that records every put.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use s3watch_object_store::{ByteStream, ObjectStore, Result, UploadError};
use s3watch_uploader::{UploadOutcome, UploadResult};
use tokio::sync::mpsc;

/// One recorded `put` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutCall {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
}

/// Records puts, injects scripted failures and detects overlapping uploads
/// of the same key.
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<PutCall>>,
    scripted: Mutex<HashMap<String, VecDeque<UploadError>>>,
    always_fail: Mutex<HashMap<String, UploadError>>,
    in_flight: Mutex<HashMap<String, usize>>,
    overlap: AtomicBool,
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Duration,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every put open for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `times` puts for `key` with `err`.
    pub fn fail_times(self, key: &str, times: usize, err: UploadError) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(key.to_string(), std::iter::repeat_n(err, times).collect());
        self
    }

    /// Fail every put for `key` with `err`.
    pub fn fail_always(self, key: &str, err: UploadError) -> Self {
        self.always_fail
            .lock()
            .unwrap()
            .insert(key.to_string(), err);
        self
    }

    pub fn calls(&self) -> Vec<PutCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &str) -> Vec<PutCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.key == key)
            .collect()
    }

    /// Whether two puts for the same key ever ran at the same time.
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    /// Highest number of puts running at once.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn enter(&self, key: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            self.overlap.store(true, Ordering::SeqCst);
        }
        drop(in_flight);

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
    }

    fn leave(&self, key: &str) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(key) {
            *count -= 1;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    fn scripted_result(&self, key: &str) -> Result<()> {
        if let Some(err) = self.always_fail.lock().unwrap().get(key) {
            return Err(err.clone());
        }
        match self
            .scripted
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    async fn put(&self, bucket: &str, key: &str, body: ByteStream) -> Result<()> {
        self.enter(key);

        let body = body
            .collect()
            .await
            .map(|bytes| bytes.into_bytes().to_vec())
            .map_err(|e| UploadError::Permanent(e.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.leave(key);

        let body = body?;
        self.calls.lock().unwrap().push(PutCall {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
        });
        self.scripted_result(key)
    }
}

/// Receive results until one is terminal.
pub async fn next_terminal(results: &mut mpsc::UnboundedReceiver<UploadResult>) -> UploadResult {
    loop {
        let result = tokio::time::timeout(Duration::from_secs(10), results.recv())
            .await
            .expect("timed out waiting for an upload result")
            .expect("result channel closed");
        if result.outcome.is_terminal() {
            return result;
        }
    }
}

/// Receive results until one is terminal, returning every result seen.
pub async fn collect_until_terminal(
    results: &mut mpsc::UnboundedReceiver<UploadResult>,
) -> Vec<UploadResult> {
    let mut seen = Vec::new();
    loop {
        let result = tokio::time::timeout(Duration::from_secs(10), results.recv())
            .await
            .expect("timed out waiting for an upload result")
            .expect("result channel closed");
        let terminal = result.outcome.is_terminal();
        seen.push(result);
        if terminal {
            return seen;
        }
    }
}

/// Whether no result arrives within `wait`.
pub async fn stays_quiet(
    results: &mut mpsc::UnboundedReceiver<UploadResult>,
    wait: Duration,
) -> bool {
    !matches!(
        tokio::time::timeout(wait, results.recv()).await,
        Ok(Some(_))
    )
}

pub fn outcomes(results: &[UploadResult]) -> Vec<UploadOutcome> {
    results.iter().map(|r| r.outcome).collect()
}
