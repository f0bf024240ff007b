use serde::{Deserialize, Serialize};

use crate::queue::JobState;

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Always the sum of the four state counts.
    pub total: u64,
}

impl QueueStats {
    /// Builds stats from `(state, count)` pairs. Unknown states are ignored.
    pub fn from_counts<I, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let mut stats = Self::default();
        for (state, count) in counts {
            match JobState::parse(state.as_ref()) {
                Some(JobState::Waiting) => stats.waiting += count,
                Some(JobState::Active) => stats.active += count,
                Some(JobState::Completed) => stats.completed += count,
                Some(JobState::Failed) => stats.failed += count,
                None => log::warn!("Ignoring count for unknown job state '{}'", state.as_ref()),
            }
        }
        stats.total = stats.waiting + stats.active + stats.completed + stats.failed;
        stats
    }

    pub fn count(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
        }
    }

    /// Jobs that have not reached a terminal state.
    pub fn pending(&self) -> u64 {
        self.waiting + self.active
    }
}
