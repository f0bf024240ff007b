use std::time::Duration;

use crate::config::Config;
use crate::error::ConfigError;
use crate::queue::backoff::RetryPolicy;

/// Runtime settings for the analysis queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub default_priority: i32,
    /// Upper bound on a single analysis call.
    pub job_timeout: Duration,
    /// An active job claimed longer ago than this is considered stalled.
    pub stall_timeout: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
    pub worker_count: usize,
    /// Idle workers look for new jobs at least this often.
    pub poll_interval: Duration,
    pub reap_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl QueueConfig {
    pub fn from_config(config: &Config) -> Self {
        let queue = &config.queue;
        Self {
            base_delay: Duration::from_millis(queue.base_delay_ms),
            max_delay: Duration::from_millis(queue.max_delay_ms),
            max_attempts: queue.max_attempts,
            default_priority: queue.default_priority,
            job_timeout: Duration::from_secs(queue.job_timeout_secs),
            stall_timeout: Duration::from_secs(queue.stall_timeout_secs),
            completed_retention: Duration::from_secs(queue.completed_retention_secs),
            failed_retention: Duration::from_secs(queue.failed_retention_secs),
            worker_count: config.worker_count,
            poll_interval: Duration::from_millis(queue.poll_interval_ms),
            reap_interval: Duration::from_secs(queue.reap_interval_secs),
        }
    }

    /// Rejects settings the queue cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Validation { message });

        if self.worker_count == 0 {
            return invalid("worker_count must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1".to_string());
        }
        for (name, value) in [
            ("base_delay", self.base_delay),
            ("job_timeout", self.job_timeout),
            ("poll_interval", self.poll_interval),
            ("reap_interval", self.reap_interval),
        ] {
            if value.is_zero() {
                return invalid(format!("{} must be greater than zero", name));
            }
        }
        if self.base_delay > self.max_delay {
            return invalid(format!(
                "base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            ));
        }
        if self.stall_timeout <= self.job_timeout {
            return invalid(format!(
                "stall_timeout ({:?}) must exceed job_timeout ({:?})",
                self.stall_timeout, self.job_timeout
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
        }
    }
}
