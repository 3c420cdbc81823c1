//! # Uploader
//!
//! Watches a directory and uploads every settled file to an S3-compatible
//! bucket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Upload Monitor                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchSubscription ──► IgnoreFilter ──► DebouncedQueue          │
//! │                                               │                 │
//! │                                               ▼                 │
//! │  ResultLog ◄── UploadResult ◄── UploadCoordinator ──► ObjectStore│
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use s3watch_uploader::{MonitorConfig, ResultLog, UploadMonitor};
//!
//! let config = MonitorConfig::from_env()?;
//! let store = Arc::new(S3ObjectStore::connect(&config.s3).await);
//! let mut handle = UploadMonitor::new(config, store).start(shutdown.clone()).await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod result;
pub mod retry;

pub use config::MonitorConfig;
pub use coordinator::{CoordinatorConfig, UploadCoordinator};
pub use error::{MonitorError, Result};
pub use monitor::{MonitorHandle, UploadMonitor};
pub use result::{ResultLog, UploadAction, UploadOutcome, UploadResult};
pub use retry::RetryPolicy;
