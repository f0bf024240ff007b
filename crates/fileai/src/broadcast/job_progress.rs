//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::queue::JobState;

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// File the job analyzes.
    pub file_id: String,
    /// Job state after this event.
    pub state: JobState,
    /// 0–100.
    pub progress: u8,
    /// Attempt number the event belongs to; 0 before the first claim.
    pub attempt: u32,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Error message (set on failure and retry).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    /// Creates a new progress event.
    pub fn new(job_id: &str, file_id: &str, state: JobState, progress: u8, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            file_id: file_id.to_string(),
            state,
            progress,
            attempt: 0,
            message: message.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates the event emitted when a job is enqueued.
    pub fn queued(job_id: &str, file_id: &str) -> Self {
        Self::new(job_id, file_id, JobState::Waiting, 0, "Job queued for analysis")
    }

    /// Creates a failure event. `state` is `Waiting` when the job was re-armed
    /// and `Failed` when attempts are exhausted.
    pub fn failed(job_id: &str, file_id: &str, state: JobState, error: &str) -> Self {
        let message = match state {
            JobState::Waiting => "Analysis failed, retry scheduled",
            _ => "Analysis failed",
        };
        Self {
            error: Some(error.to_string()),
            ..Self::new(job_id, file_id, state, 0, message)
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one claimed attempt of a job.
    pub fn track(&self, job_id: &str, file_id: &str, attempt: u32) -> JobProgressTracker {
        JobProgressTracker {
            job_id: job_id.to_string(),
            file_id: file_id.to_string(),
            attempt,
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Emits events for a single attempt of a job.
pub struct JobProgressTracker {
    job_id: String,
    file_id: String,
    attempt: u32,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    fn emit(&self, event: JobProgressEvent) {
        let _ = self.sender.send(event.with_attempt(self.attempt));
    }

    /// Reports progress of the active attempt.
    pub fn progress(&self, progress: u8, message: &str) {
        self.emit(JobProgressEvent::new(
            &self.job_id,
            &self.file_id,
            JobState::Active,
            progress,
            message,
        ));
    }

    pub fn completed(&self, message: &str) {
        self.emit(JobProgressEvent::new(
            &self.job_id,
            &self.file_id,
            JobState::Completed,
            100,
            message,
        ));
    }

    /// Reports a failed attempt; `state` is the state the job moved to.
    pub fn failed(&self, state: JobState, error: &str) {
        self.emit(JobProgressEvent::failed(
            &self.job_id,
            &self.file_id,
            state,
            error,
        ));
    }
}
