use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::mime::detect_mime_type;
use crate::db::job_repo::JobRow;
use crate::db::{from_millis, DatabaseError};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// Completed and Failed jobs never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the file a job analyzes. The file record itself is owned by
/// the file record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub file_id: String,
    pub path: PathBuf,
    /// MIME type of the file (e.g., "application/pdf", "image/png").
    pub mime_type: Option<String>,
}

impl FileRef {
    /// Creates a reference, detecting the MIME type from the path.
    pub fn new<P: Into<PathBuf>>(file_id: &str, path: P) -> Self {
        let path = path.into();
        let mime_type = detect_mime_type(&path);
        Self {
            file_id: file_id.to_string(),
            path,
            mime_type,
        }
    }

    /// Creates a reference with an explicit MIME type.
    pub fn with_mime_type<P: Into<PathBuf>>(file_id: &str, path: P, mime_type: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            path: path.into(),
            mime_type: Some(mime_type.to_string()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A persisted analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub file_ref: FileRef,
    pub state: JobState,
    /// Lower values are served first.
    pub priority: i32,
    /// Execution attempts started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    /// The job is not claimed before this instant.
    pub next_eligible_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// 0–100.
    pub progress: u8,
    /// Insertion order, used as the final claim tie-break.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn from_row(row: JobRow) -> Result<Self, DatabaseError> {
        let state = JobState::parse(&row.state).ok_or_else(|| DatabaseError::Corrupt {
            table: "jobs",
            reason: format!("unknown state '{}' for job {}", row.state, row.id),
        })?;
        let optional = |ms: Option<i64>| ms.map(|ms| from_millis(ms, "jobs")).transpose();

        Ok(Self {
            file_ref: FileRef {
                file_id: row.file_id,
                path: PathBuf::from(row.file_path),
                mime_type: row.mime_type,
            },
            state,
            priority: row.priority,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            next_eligible_at: from_millis(row.next_eligible_at, "jobs")?,
            last_error: row.last_error,
            progress: row.progress,
            seq: row.seq,
            created_at: from_millis(row.created_at, "jobs")?,
            updated_at: from_millis(row.updated_at, "jobs")?,
            claimed_at: optional(row.claimed_at)?,
            finished_at: optional(row.finished_at)?,
            id: row.id,
        })
    }
}

/// A job held by one worker. The lease token fences every transition the
/// holder makes, so a holder whose claim was recovered as stalled can no
/// longer change the job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub(crate) lease_token: String,
}

impl ClaimedJob {
    /// Attempt number of this claim, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.job.attempts
    }
}

/// Returned to the producer's caller after a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: String,
    pub file_id: String,
    pub priority: i32,
    pub max_attempts: u32,
}

impl From<&Job> for JobHandle {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            file_id: job.file_ref.file_id.clone(),
            priority: job.priority,
            max_attempts: job.max_attempts,
        }
    }
}

/// Per-enqueue overrides. Unset fields use the queue defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    pub priority: Option<i32>,
    pub max_attempts: Option<u32>,
}
