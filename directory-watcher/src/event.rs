//! File events from directory watching.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use serde::{Deserialize, Serialize};

/// A file creation or modification observed in a watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// The kind of event.
    pub kind: WatchEventKind,

    /// Absolute path to the affected file.
    pub path: PathBuf,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// File size when the event was captured, if the file could be stat-ed.
    pub size: Option<u64>,
}

impl WatchEvent {
    /// Create a new event stamped with the current time.
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
            size: None,
        }
    }

    /// Attach the observed file size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Build an event for `path`, capturing its current size.
    pub fn capture(kind: WatchEventKind, path: &Path) -> Self {
        let event = Self::new(kind, path);
        match path.metadata() {
            Ok(metadata) => event.with_size(metadata.len()),
            Err(_) => event,
        }
    }

    /// The file name component, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Kind of file event forwarded to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    /// File was created (or renamed into place).
    Created,

    /// File content was modified.
    Modified,
}

impl WatchEventKind {
    /// Map a notify event kind. Deletions, access and metadata-only changes
    /// carry no new content and yield `None`.
    pub fn from_notify(kind: &notify::EventKind) -> Option<Self> {
        match kind {
            notify::EventKind::Create(_) => Some(Self::Created),
            notify::EventKind::Modify(modify_kind) => match modify_kind {
                ModifyKind::Name(RenameMode::To | RenameMode::Both) => Some(Self::Created),
                ModifyKind::Name(_) | ModifyKind::Metadata(_) => None,
                _ => Some(Self::Modified),
            },
            _ => None,
        }
    }
}
