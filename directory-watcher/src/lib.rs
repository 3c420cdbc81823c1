//! # Directory Watcher
//!
//! This crate turns file system activity in one directory into a stream of
//! settled files ready for upload.
//!
//! ## Features
//!
//! - **Real-time Watching**: notify-backed subscription per directory
//! - **Ignore Rules**: swap, temp, backup, hidden and empty files
//! - **Debouncing**: one settled entry per file after a quiet period
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchConfig ──► WatchSubscription ──► WatchEvent               │
//! │                                            │                    │
//! │                                            ▼                    │
//! │                 IgnoreFilter ──► DebouncedQueue ──► PendingUpload│
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod filter;
pub mod watcher;

pub use config::{DebounceConfig, IgnoreConfig, WatchConfig};
pub use debounce::{DebouncedQueue, PendingUpload};
pub use error::{Result, WatcherError};
pub use event::{WatchEvent, WatchEventKind};
pub use filter::IgnoreFilter;
pub use watcher::{DirectoryWatcher, WatchSubscription};
