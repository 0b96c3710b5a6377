//! Configuration for Spillway
//!
//! Centralized configuration with sensible defaults. Values are expected to
//! be already resolved by whatever property loader the host application uses.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SpillError};

/// Main configuration for a Spillway engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Layout Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all shards
    /// Internal structure:
    ///   {root_dir}/
    ///     ├── 0/                      (shard 0)
    ///     │   └── 2026-01-01_12-00-00-000/
    ///     │       └── cache.db
    ///     ├── 1/                      (shard 1)
    ///     └── .trash/                 (directories awaiting deletion)
    pub root_dir: PathBuf,

    /// Number of independent database shards
    pub number_of_dbs: usize,

    /// Number of tables inside each shard
    pub tables_per_db: usize,

    // -------------------------------------------------------------------------
    // Pool Configuration
    // -------------------------------------------------------------------------
    /// Max connections per shard pool
    pub max_pool_size: u32,

    /// How long to wait for a pooled connection (milliseconds)
    pub connection_timeout_ms: u64,

    /// Warn when a connection is held longer than this (milliseconds, 0 disables)
    pub leak_detection_threshold_ms: u64,

    /// `;`-separated `name=value` pragmas applied to every new connection
    pub connection_params: String,

    // -------------------------------------------------------------------------
    // Error / Recovery Configuration
    // -------------------------------------------------------------------------
    /// At most one warning-level error log per this interval (milliseconds)
    pub error_log_interval_ms: u64,

    /// Rebuild a shard once its error count exceeds this (0 disables)
    pub recover_after_errors: u64,

    /// Reopen the newest snapshot on startup if it was touched within this window (milliseconds)
    pub recover_on_restart_ms: u64,

    // -------------------------------------------------------------------------
    // Flush Configuration
    // -------------------------------------------------------------------------
    /// Always rebuild shards on a full flush instead of truncating tables
    pub rebuild_on_remove_all: bool,

    /// Consecutive truncate failures before a full flush turns destructive
    pub remove_all_failure_threshold: u32,

    // -------------------------------------------------------------------------
    // Exclusion Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the do-not-cache set
    pub exclusion_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./spillway_data"),
            number_of_dbs: 2,
            tables_per_db: 9,
            max_pool_size: 32,
            connection_timeout_ms: 1000,
            leak_detection_threshold_ms: 0,
            connection_params: "journal_mode=WAL;synchronous=NORMAL".to_string(),
            error_log_interval_ms: 5000,
            recover_after_errors: 5000,
            recover_on_restart_ms: 30 * 60 * 1000, // 30 minutes
            rebuild_on_remove_all: false,
            remove_all_failure_threshold: 1,
            exclusion_capacity: 1000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the shard layout and pool sizing are usable
    pub fn validate(&self) -> Result<()> {
        if self.number_of_dbs == 0 {
            return Err(SpillError::Config("number_of_dbs must be at least 1".to_string()));
        }
        if self.tables_per_db == 0 {
            return Err(SpillError::Config("tables_per_db must be at least 1".to_string()));
        }
        if self.max_pool_size == 0 {
            return Err(SpillError::Config("max_pool_size must be at least 1".to_string()));
        }
        parse_connection_params(&self.connection_params)?;
        Ok(())
    }

    /// Connection acquire timeout
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Leak detection threshold, `None` when disabled
    pub fn leak_detection_threshold(&self) -> Option<Duration> {
        match self.leak_detection_threshold_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Warm recovery window
    pub fn recover_on_restart(&self) -> Duration {
        Duration::from_millis(self.recover_on_restart_ms)
    }

    /// Failure threshold for full flushes, never below 1
    pub fn effective_remove_all_threshold(&self) -> u32 {
        self.remove_all_failure_threshold.max(1)
    }
}

/// Parse `name=value;name=value` into pragma pairs
///
/// Empty segments are skipped; a segment without `=` is a config error.
pub fn parse_connection_params(params: &str) -> Result<Vec<(String, String)>> {
    params
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (name, value) = segment.split_once('=').ok_or_else(|| {
                SpillError::Config(format!("connection parameter '{}' is not name=value", segment))
            })?;
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(SpillError::Config(format!(
                    "invalid connection parameter name '{}'",
                    name
                )));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the root directory (parent of all shard directories)
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Set the number of database shards
    pub fn number_of_dbs(mut self, count: usize) -> Self {
        self.config.number_of_dbs = count;
        self
    }

    /// Set the number of tables per shard
    pub fn tables_per_db(mut self, count: usize) -> Self {
        self.config.tables_per_db = count;
        self
    }

    /// Set the maximum pool size per shard
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.config.max_pool_size = size;
        self
    }

    /// Set the connection acquire timeout (in milliseconds)
    pub fn connection_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connection_timeout_ms = ms;
        self
    }

    /// Set the leak detection threshold (in milliseconds, 0 disables)
    pub fn leak_detection_threshold_ms(mut self, ms: u64) -> Self {
        self.config.leak_detection_threshold_ms = ms;
        self
    }

    /// Set the backend connection parameters
    pub fn connection_params(mut self, params: impl Into<String>) -> Self {
        self.config.connection_params = params.into();
        self
    }

    /// Set the error log rate limit (in milliseconds)
    pub fn error_log_interval_ms(mut self, ms: u64) -> Self {
        self.config.error_log_interval_ms = ms;
        self
    }

    /// Set the per-shard error count that triggers a rebuild (0 disables)
    pub fn recover_after_errors(mut self, count: u64) -> Self {
        self.config.recover_after_errors = count;
        self
    }

    /// Set the warm recovery window (in milliseconds)
    pub fn recover_on_restart_ms(mut self, ms: u64) -> Self {
        self.config.recover_on_restart_ms = ms;
        self
    }

    /// Always rebuild on full flush
    pub fn rebuild_on_remove_all(mut self, rebuild: bool) -> Self {
        self.config.rebuild_on_remove_all = rebuild;
        self
    }

    /// Set the consecutive truncate failures before a destructive flush
    pub fn remove_all_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.remove_all_failure_threshold = threshold;
        self
    }

    /// Set the exclusion set capacity
    pub fn exclusion_capacity(mut self, capacity: usize) -> Self {
        self.config.exclusion_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
