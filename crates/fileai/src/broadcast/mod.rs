//! Broadcasting of job progress for real-time observers.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
