//! Configuration types for directory watching, ignore rules and debouncing.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default capacity of the raw event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Configuration for a watched directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Path to the directory.
    pub path: PathBuf,

    /// Whether subdirectories are watched too.
    pub recursive: bool,

    /// Capacity of the channel between the notify thread and consumers.
    pub channel_capacity: usize,
}

impl WatchConfig {
    /// Create a new non-recursive watch config.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Watch subdirectories as well.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set the event channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Rules deciding which files never reach the upload pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// File name suffixes to suppress (matched case-insensitively).
    pub suffixes: Vec<String>,

    /// Glob patterns matched against the file name.
    pub patterns: Vec<String>,

    /// Suppress files whose name starts with a dot.
    pub ignore_hidden: bool,

    /// Suppress files that were empty when the event was captured.
    pub ignore_empty: bool,
}

impl IgnoreConfig {
    /// Replace the suffix list.
    pub fn with_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Add a glob pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Toggle the hidden-file rule.
    pub fn hidden(mut self, enabled: bool) -> Self {
        self.ignore_hidden = enabled;
        self
    }

    /// Toggle the zero-byte rule.
    pub fn empty(mut self, enabled: bool) -> Self {
        self.ignore_empty = enabled;
        self
    }

    /// Default suffixes: editor swap files, temp files and backups.
    pub fn default_suffixes() -> Vec<String> {
        [".swp", ".tmp", ".bak", ".swx"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Default file name patterns.
    pub fn default_patterns() -> Vec<String> {
        ["*~", ".DS_Store", "Thumbs.db", ".#*"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            suffixes: Self::default_suffixes(),
            patterns: Self::default_patterns(),
            ignore_hidden: true,
            ignore_empty: false,
        }
    }
}

/// Debounce timing and shutdown behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// How long a file must stay untouched before it is emitted.
    pub quiescence: Duration,

    /// How often pending entries are scanned.
    pub tick: Duration,

    /// Emit remaining entries on shutdown instead of dropping them.
    pub flush_on_shutdown: bool,
}

impl DebounceConfig {
    /// Set the quiescence window.
    pub fn with_quiescence(mut self, quiescence: Duration) -> Self {
        self.quiescence = quiescence;
        self
    }

    /// Set the scan interval.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Set the shutdown behaviour.
    pub fn flush_on_shutdown(mut self, flush: bool) -> Self {
        self.flush_on_shutdown = flush;
        self
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiescence: Duration::from_millis(1000),
            tick: Duration::from_millis(500),
            flush_on_shutdown: true,
        }
    }
}
