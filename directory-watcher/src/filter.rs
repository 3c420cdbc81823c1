//! Ignore rules for editor noise, temporary files and hidden files.

use std::path::Path;

use glob::Pattern;

use crate::config::IgnoreConfig;
use crate::error::{Result, WatcherError};
use crate::event::WatchEvent;

/// Compiled ignore rules.
///
/// All checks look at the final path component only; directories above the
/// file never influence the decision.
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    suffixes: Vec<String>,
    patterns: Vec<Pattern>,
    ignore_hidden: bool,
    ignore_empty: bool,
}

impl IgnoreFilter {
    /// Compile a filter, rejecting malformed glob patterns.
    pub fn new(config: &IgnoreConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| WatcherError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            suffixes: config
                .suffixes
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            patterns,
            ignore_hidden: config.ignore_hidden,
            ignore_empty: config.ignore_empty,
        })
    }

    /// Returns true when events for `path` should be suppressed.
    pub fn should_ignore(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };

        if self.ignore_hidden && name.starts_with('.') {
            return true;
        }

        let lower = name.to_ascii_lowercase();
        if self.suffixes.iter().any(|suffix| lower.ends_with(suffix)) {
            return true;
        }

        self.patterns.iter().any(|pattern| pattern.matches(&name))
    }

    /// Path rules plus the zero-byte rule, using the size captured with the
    /// event. An unknown size never counts as empty.
    pub fn should_ignore_event(&self, event: &WatchEvent) -> bool {
        if self.should_ignore(&event.path) {
            return true;
        }
        self.ignore_empty && event.size == Some(0)
    }
}
