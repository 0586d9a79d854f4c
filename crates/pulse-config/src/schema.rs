//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Poller and worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum number of jobs executed concurrently within one tick.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    /// IANA timezone used to evaluate cron expressions and naive instants.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Maximum number of due jobs picked up per tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,

    /// A `running` job untouched for this long is considered stale at startup.
    #[serde(default = "default_stale_running_after")]
    pub stale_running_after_secs: u64,

    /// Mark stale `running` jobs as `failed` at startup instead of only reporting them.
    #[serde(default)]
    pub fail_stale_running: bool,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_workers() -> u32 {
    4
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_batch_limit() -> u32 {
    100
}

fn default_stale_running_after() -> u64 {
    3600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_workers: default_max_workers(),
            timezone: default_timezone(),
            batch_limit: default_batch_limit(),
            stale_running_after_secs: default_stale_running_after(),
            fail_stale_running: false,
        }
    }
}

/// Job store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Keep everything in memory (nothing survives a restart).
    #[serde(default)]
    pub in_memory: bool,
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pulse")
        .join("pulse.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            in_memory: false,
        }
    }
}

/// Execution endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// URL the dispatcher POSTs execution requests to.
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// Bearer token sent with every execution request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Upper bound on a single execution call.
    #[serde(default = "default_executor_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint_url() -> String {
    "http://127.0.0.1:8080/v1/executions".to_string()
}

fn default_executor_timeout() -> u64 {
    30
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            api_key: None,
            timeout_secs: default_executor_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Emit console logs as JSON.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            json: false,
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
