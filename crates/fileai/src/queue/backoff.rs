//! Retry and exponential backoff policy.

use std::time::Duration;

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-arm the job; it becomes eligible again after `delay`.
    Retry { delay: Duration },
    /// Attempts are exhausted; the job fails permanently.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failed attempt: `base * 2^(attempt - 1)`,
    /// capped at `max_delay`. Attempt 0 is treated as attempt 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        1u32.checked_shl(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Decides the fate of a job that has made `attempts` attempts out of its
    /// own `max_attempts` and whose latest attempt failed.
    pub fn decide(&self, attempts: u32, max_attempts: u32) -> RetryDecision {
        if attempts < max_attempts {
            RetryDecision::Retry {
                delay: self.delay(attempts),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
