use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::error::QueueError;
use crate::queue::job::{EnqueueOptions, FileRef, JobHandle};
use crate::queue::store::JobStore;

/// Turns upload events into persisted Waiting jobs.
///
/// Enqueueing never runs or waits for analysis; it only persists the job and
/// wakes one idle worker.
#[derive(Clone)]
pub struct Producer {
    store: Arc<JobStore>,
    progress: JobProgressBroadcaster,
    wake: Arc<Notify>,
    default_priority: i32,
    default_max_attempts: u32,
}

impl Producer {
    pub fn new(
        store: Arc<JobStore>,
        progress: JobProgressBroadcaster,
        wake: Arc<Notify>,
        default_priority: i32,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            progress,
            wake,
            default_priority,
            default_max_attempts,
        }
    }

    /// Persists a job for `file_ref`. Fails with [`QueueError::Enqueue`] when
    /// the job store cannot accept it.
    pub fn enqueue(
        &self,
        file_ref: FileRef,
        options: EnqueueOptions,
    ) -> Result<JobHandle, QueueError> {
        let priority = options.priority.unwrap_or(self.default_priority);
        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);

        let job = self
            .store
            .enqueue(&file_ref, priority, max_attempts, Utc::now())
            .map_err(|e| match e {
                QueueError::Enqueue(_) => e,
                other => QueueError::Enqueue(other.to_string()),
            })?;

        log::info!(
            "Queued analysis job {} for file {} ({})",
            job.id,
            file_ref.file_id,
            file_ref.path.display()
        );

        self.progress
            .send(JobProgressEvent::queued(&job.id, &job.file_ref.file_id));
        self.wake.notify_one();

        Ok(JobHandle::from(&job))
    }
}
