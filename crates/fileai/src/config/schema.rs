use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file holding jobs and file records. Defaults to
    /// `~/.fileai/data/fileai.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            worker_count: default_worker_count(),
            queue: QueueSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Retry, timeout and retention settings, in plain integer units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_priority")]
    pub default_priority: i32,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,
    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_priority() -> i32 {
    1
}

fn default_job_timeout_secs() -> u64 {
    120
}

fn default_stall_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_completed_retention_secs() -> u64 {
    24 * 3600
}

fn default_failed_retention_secs() -> u64 {
    7 * 24 * 3600
}

fn default_reap_interval_secs() -> u64 {
    24 * 3600
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            default_priority: default_priority(),
            job_timeout_secs: default_job_timeout_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            completed_retention_secs: default_completed_retention_secs(),
            failed_retention_secs: default_failed_retention_secs(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}
