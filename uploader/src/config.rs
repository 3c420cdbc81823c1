//! Configuration for the upload monitor.
//!
//! Everything is read once at startup from environment-style key/value
//! pairs and passed down explicitly.

use std::path::PathBuf;
use std::time::Duration;

use s3watch_directory_watcher::{DebounceConfig, IgnoreConfig, WatchConfig};
use s3watch_object_store::S3Settings;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coordinator::{CoordinatorConfig, DEFAULT_MAX_CONCURRENCY};
use crate::error::{MonitorError, Result};
use crate::retry::RetryPolicy;

pub const ENV_ENDPOINT_URL: &str = "S3_ENDPOINT_URL";
pub const ENV_ACCESS_KEY: &str = "S3_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "S3_SECRET_KEY";
pub const ENV_BUCKET_NAME: &str = "S3_BUCKET_NAME";
pub const ENV_REGION: &str = "S3_REGION";
pub const ENV_FORCE_PATH_STYLE: &str = "S3_FORCE_PATH_STYLE";
pub const ENV_KEY_PREFIX: &str = "S3_KEY_PREFIX";
pub const ENV_VERIFY_BUCKET: &str = "S3_VERIFY_BUCKET";
pub const ENV_TIMEOUT_SECS: &str = "S3_TIMEOUT_SECS";
pub const ENV_WATCH_DIR: &str = "WATCH_DIR";
pub const ENV_QUIESCENCE_MS: &str = "QUIESCENCE_MS";
pub const ENV_DEBOUNCE_TICK_MS: &str = "DEBOUNCE_TICK_MS";
pub const ENV_UPLOAD_CONCURRENCY: &str = "UPLOAD_CONCURRENCY";
pub const ENV_UPLOAD_MAX_ATTEMPTS: &str = "UPLOAD_MAX_ATTEMPTS";
pub const ENV_SHUTDOWN_GRACE_SECS: &str = "SHUTDOWN_GRACE_SECS";
pub const ENV_SHUTDOWN_FLUSH: &str = "SHUTDOWN_FLUSH";
pub const ENV_IGNORE_SUFFIXES: &str = "IGNORE_SUFFIXES";
pub const ENV_IGNORE_PATTERNS: &str = "IGNORE_PATTERNS";
pub const ENV_IGNORE_HIDDEN: &str = "IGNORE_HIDDEN";
pub const ENV_IGNORE_EMPTY: &str = "IGNORE_EMPTY";

/// Directory watched when `WATCH_DIR` is unset.
pub const DEFAULT_WATCH_DIR: &str = "./";

/// Complete monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Endpoint connection settings.
    pub s3: S3Settings,

    /// Upload scheduling and target bucket.
    pub coordinator: CoordinatorConfig,

    /// HEAD the bucket before watching.
    pub verify_bucket: bool,

    /// Directory to watch.
    pub watch: WatchConfig,

    /// Files to leave alone.
    pub ignore: IgnoreConfig,

    /// Debounce timing.
    pub debounce: DebounceConfig,

    /// How long in-flight uploads may run after shutdown is requested.
    pub shutdown_grace: Duration,
}

impl MonitorConfig {
    /// Defaults for the given endpoint, bucket and directory.
    pub fn new(
        endpoint_url: impl Into<String>,
        bucket: impl Into<String>,
        watch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            s3: S3Settings::new(endpoint_url),
            coordinator: CoordinatorConfig::new(bucket),
            verify_bucket: true,
            watch: WatchConfig::new(watch_dir),
            ignore: IgnoreConfig::default(),
            debounce: DebounceConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Target bucket.
    pub fn bucket(&self) -> &str {
        &self.coordinator.bucket
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let endpoint =
            get(ENV_ENDPOINT_URL).ok_or(MonitorError::MissingSetting(ENV_ENDPOINT_URL))?;
        let bucket = get(ENV_BUCKET_NAME).ok_or(MonitorError::MissingSetting(ENV_BUCKET_NAME))?;
        let watch_dir = get(ENV_WATCH_DIR).unwrap_or_else(|| DEFAULT_WATCH_DIR.to_string());

        let mut config = Self::new(endpoint, bucket, watch_dir);

        match (get(ENV_ACCESS_KEY), get(ENV_SECRET_KEY)) {
            (Some(access_key), Some(secret_key)) => {
                config.s3 = config.s3.with_credentials(access_key, secret_key);
            }
            (None, None) => {}
            _ => warn!(
                "Only one of {ENV_ACCESS_KEY} and {ENV_SECRET_KEY} is set; uploads will run without credentials"
            ),
        }

        if let Some(region) = get(ENV_REGION) {
            config.s3 = config.s3.with_region(region);
        }
        if let Some(value) = get(ENV_FORCE_PATH_STYLE) {
            config.s3.force_path_style = parse_bool(ENV_FORCE_PATH_STYLE, &value)?;
        }
        if let Some(value) = get(ENV_TIMEOUT_SECS) {
            config.s3.timeout = Duration::from_secs(parse_number(ENV_TIMEOUT_SECS, &value)?);
        }
        if let Some(value) = get(ENV_VERIFY_BUCKET) {
            config.verify_bucket = parse_bool(ENV_VERIFY_BUCKET, &value)?;
        }
        if let Some(prefix) = get(ENV_KEY_PREFIX) {
            config.coordinator.key_prefix = prefix;
        }

        if let Some(value) = get(ENV_QUIESCENCE_MS) {
            config.debounce.quiescence =
                Duration::from_millis(parse_number(ENV_QUIESCENCE_MS, &value)?);
        }
        if let Some(value) = get(ENV_DEBOUNCE_TICK_MS) {
            let tick = parse_number(ENV_DEBOUNCE_TICK_MS, &value)?;
            if tick == 0 {
                return Err(invalid(ENV_DEBOUNCE_TICK_MS, &value, "must be positive"));
            }
            config.debounce.tick = Duration::from_millis(tick);
        }
        if let Some(value) = get(ENV_SHUTDOWN_FLUSH) {
            config.debounce.flush_on_shutdown = parse_bool(ENV_SHUTDOWN_FLUSH, &value)?;
        }
        if let Some(value) = get(ENV_SHUTDOWN_GRACE_SECS) {
            config.shutdown_grace =
                Duration::from_secs(parse_number(ENV_SHUTDOWN_GRACE_SECS, &value)?);
        }

        config.coordinator.max_concurrency = match get(ENV_UPLOAD_CONCURRENCY) {
            Some(value) => parse_number(ENV_UPLOAD_CONCURRENCY, &value)?,
            None => DEFAULT_MAX_CONCURRENCY,
        };
        if let Some(value) = get(ENV_UPLOAD_MAX_ATTEMPTS) {
            let attempts: u32 = parse_number(ENV_UPLOAD_MAX_ATTEMPTS, &value)?;
            if attempts == 0 {
                return Err(invalid(ENV_UPLOAD_MAX_ATTEMPTS, &value, "must be at least 1"));
            }
            config.coordinator.retry = RetryPolicy::default().with_max_attempts(attempts);
        }

        if let Some(value) = get(ENV_IGNORE_SUFFIXES) {
            config.ignore.suffixes = parse_list(&value);
        }
        if let Some(value) = get(ENV_IGNORE_PATTERNS) {
            config.ignore.patterns = parse_list(&value);
        }
        if let Some(value) = get(ENV_IGNORE_HIDDEN) {
            config.ignore.ignore_hidden = parse_bool(ENV_IGNORE_HIDDEN, &value)?;
        }
        if let Some(value) = get(ENV_IGNORE_EMPTY) {
            config.ignore.ignore_empty = parse_bool(ENV_IGNORE_EMPTY, &value)?;
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> MonitorError {
    MonitorError::InvalidSetting {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| invalid(key, value, e.to_string()))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}
