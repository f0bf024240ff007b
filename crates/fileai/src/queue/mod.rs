//! Durable analysis job queue.
//!
//! Jobs live in SQLite and move `waiting → active → completed | failed`,
//! with failed attempts re-armed as `waiting` under exponential backoff until
//! `max_attempts` is reached.

pub mod backoff;
pub mod config;
pub mod job;
pub mod pool;
pub mod producer;
pub mod reaper;
pub mod stats;
pub mod store;

pub use backoff::{RetryDecision, RetryPolicy};
pub use config::QueueConfig;
pub use job::{ClaimedJob, EnqueueOptions, FileRef, Job, JobHandle, JobState};
pub use pool::{WorkerContext, WorkerPool};
pub use producer::Producer;
pub use reaper::{ReapReport, Reaper};
pub use stats::QueueStats;
pub use store::{stall_error, FailureOutcome, JobStore};
