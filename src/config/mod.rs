//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup and fails fast on malformed values. Every setting
//! has a default, so an empty environment yields a working config.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ROOT: &str = "/workq/tasks";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_RESCAN_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_WAIT_RECHECK: Duration = Duration::from_secs(10);
pub const DEFAULT_REARM_BACKOFF: Duration = Duration::from_secs(1);

/// Settings for one work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Registry node whose children are the work items.
    pub root: String,
    /// Period of the safety-net rescan. The first rescan fires after a random
    /// delay below this.
    pub rescan_period: Duration,
    /// Upper bound on how long a waiter sleeps between registry checks.
    pub wait_recheck: Duration,
    /// Delay between attempts to re-arm a child watch after a failed read.
    pub rearm_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            rescan_period: DEFAULT_RESCAN_PERIOD,
            wait_recheck: DEFAULT_WAIT_RECHECK,
            rearm_backoff: DEFAULT_REARM_BACKOFF,
        }
    }
}

impl QueueConfig {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        crate::coord::validate_path(&self.root)
            .map_err(|e| Error::Config(format!("bad queue root: {e}")))?;
        for (name, value) in [
            ("rescan_period", self.rescan_period),
            ("wait_recheck", self.wait_recheck),
            ("rearm_backoff", self.rearm_backoff),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub queue: QueueConfig,
    pub concurrency: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// On-disk shape. Durations are whole seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    root: Option<String>,
    concurrency: Option<usize>,
    rescan_period_secs: Option<u64>,
    wait_recheck_secs: Option<u64>,
    rearm_backoff_secs: Option<u64>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let file = FileConfig {
            root: std::env::var("WORKQ_ROOT").ok(),
            concurrency: parsed_var("WORKQ_CONCURRENCY")?,
            rescan_period_secs: parsed_var("WORKQ_RESCAN_SECS")?,
            wait_recheck_secs: parsed_var("WORKQ_WAIT_RECHECK_SECS")?,
            rearm_backoff_secs: parsed_var("WORKQ_REARM_BACKOFF_SECS")?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").ok(),
        };
        Self::from_parts(file)
    }

    /// Load configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: FileConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        Self::from_parts(file)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    fn from_parts(file: FileConfig) -> Result<Self> {
        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            root: file.root.unwrap_or(defaults.root),
            rescan_period: file
                .rescan_period_secs
                .map_or(defaults.rescan_period, Duration::from_secs),
            wait_recheck: file
                .wait_recheck_secs
                .map_or(defaults.wait_recheck, Duration::from_secs),
            rearm_backoff: file
                .rearm_backoff_secs
                .map_or(defaults.rearm_backoff, Duration::from_secs),
        };
        queue.validate()?;

        let concurrency = file.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }

        Ok(Self {
            queue,
            concurrency,
            otel_endpoint: file.otel_endpoint,
            log_level: file.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("environment variable {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
