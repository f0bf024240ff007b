//! Job repository: queue operations on the `jobs` table.
//!
//! Every transition out of `active` is guarded by the lease token written at
//! claim time, so each UPDATE doubles as a compare-and-set. Functions that
//! perform a guarded transition return `false` when the guard did not match.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database. Timestamps are epoch milliseconds.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub seq: i64,
    pub id: String,
    pub file_id: String,
    pub file_path: String,
    pub mime_type: Option<String>,
    pub state: String,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_eligible_at: i64,
    pub last_error: Option<String>,
    pub progress: u8,
    pub lease_token: Option<String>,
    pub claimed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            seq: row.get("seq")?,
            id: row.get("id")?,
            file_id: row.get("file_id")?,
            file_path: row.get("file_path")?,
            mime_type: row.get("mime_type")?,
            state: row.get("state")?,
            priority: row.get("priority")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            next_eligible_at: row.get("next_eligible_at")?,
            last_error: row.get("last_error")?,
            progress: row.get("progress")?,
            lease_token: row.get("lease_token")?,
            claimed_at: row.get("claimed_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Inserts a new job row and returns its insertion sequence number.
/// The `seq` field of the given row is ignored.
pub fn insert(db: &Database, job: &JobRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, file_id, file_path, mime_type, state, priority, attempts,
             max_attempts, next_eligible_at, last_error, progress, lease_token, claimed_at,
             created_at, updated_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                job.id,
                job.file_id,
                job.file_path,
                job.mime_type,
                job.state,
                job.priority,
                job.attempts,
                job.max_attempts,
                job.next_eligible_at,
                job.last_error,
                job.progress,
                job.lease_token,
                job.claimed_at,
                job.created_at,
                job.updated_at,
                job.finished_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists every job recorded for a file, newest first.
pub fn list_for_file(db: &Database, file_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE file_id = ?1 ORDER BY seq DESC")?;
        let rows = stmt
            .query_map(params![file_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Atomically claims the next eligible waiting job.
///
/// Eligible means `waiting`, `next_eligible_at <= now`, attempts left, and no
/// other job for the same file currently active. The claim increments
/// `attempts`, stamps a fresh lease token and resets progress.
pub fn claim_next(
    db: &Database,
    now: i64,
    lease_token: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE jobs
                 SET state = 'active', attempts = attempts + 1, lease_token = ?2,
                     claimed_at = ?1, updated_at = ?1, progress = 0
                 WHERE seq = (
                     SELECT j.seq FROM jobs j
                     WHERE j.state = 'waiting'
                       AND j.next_eligible_at <= ?1
                       AND j.attempts < j.max_attempts
                       AND NOT EXISTS (
                           SELECT 1 FROM jobs a WHERE a.file_id = j.file_id AND a.state = 'active'
                       )
                     ORDER BY j.priority ASC, j.next_eligible_at ASC, j.seq ASC
                     LIMIT 1
                 )
                 AND state = 'waiting'
                 RETURNING *",
                params![now, lease_token],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Records progress for an active job held under `lease_token`.
pub fn update_progress(
    db: &Database,
    id: &str,
    lease_token: &str,
    progress: u8,
    now: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET progress = ?3, updated_at = ?4
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, lease_token, progress, now],
        )?;
        Ok(changed == 1)
    })
}

/// Active → Completed.
pub fn complete(
    db: &Database,
    id: &str,
    lease_token: &str,
    now: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs
             SET state = 'completed', progress = 100, last_error = NULL, lease_token = NULL,
                 updated_at = ?3, finished_at = ?3
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, lease_token, now],
        )?;
        Ok(changed == 1)
    })
}

/// Active → Waiting, re-armed to become eligible at `next_eligible_at`.
pub fn rearm(
    db: &Database,
    id: &str,
    lease_token: &str,
    error: &str,
    next_eligible_at: i64,
    now: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs
             SET state = 'waiting', last_error = ?3, next_eligible_at = ?4, progress = 0,
                 lease_token = NULL, claimed_at = NULL, updated_at = ?5
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, lease_token, error, next_eligible_at, now],
        )?;
        Ok(changed == 1)
    })
}

/// Active → Failed (terminal).
pub fn fail(
    db: &Database,
    id: &str,
    lease_token: &str,
    error: &str,
    now: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs
             SET state = 'failed', last_error = ?3, lease_token = NULL,
                 updated_at = ?4, finished_at = ?4
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, lease_token, error, now],
        )?;
        Ok(changed == 1)
    })
}

/// Returns active jobs claimed strictly before `claimed_before`.
pub fn find_stalled(db: &Database, claimed_before: i64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE state = 'active' AND claimed_at < ?1 ORDER BY claimed_at",
        )?;
        let rows = stmt
            .query_map(params![claimed_before], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes terminal jobs in `state` that finished strictly before `cutoff`.
///
/// The SQL only ever matches `completed` or `failed` rows; passing any other
/// state deletes nothing.
pub fn delete_finished_before(
    db: &Database,
    state: &str,
    cutoff: i64,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM jobs
             WHERE state = ?1 AND state IN ('completed', 'failed')
               AND finished_at IS NOT NULL AND finished_at < ?2",
            params![state, cutoff],
        )?;
        Ok(removed)
    })
}

/// Reads the trigger-maintained per-state counters.
pub fn state_counts(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT state, count FROM job_state_counts")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
