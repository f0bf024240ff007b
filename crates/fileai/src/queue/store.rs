//! Persistent job store.
//!
//! Wraps the `jobs` table with the queue's state machine. Every transition is
//! a single guarded statement in [`job_repo`], so the store itself holds no
//! job state in memory and any number of workers can share one instance.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::job_repo::{self, JobRow};
use crate::db::{from_millis, to_millis, Database, DatabaseError};
use crate::error::QueueError;
use crate::queue::backoff::{RetryDecision, RetryPolicy};
use crate::queue::job::{ClaimedJob, FileRef, Job, JobState};
use crate::queue::stats::QueueStats;

/// Where a failed attempt left its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Re-armed as Waiting; eligible again at `next_eligible_at`.
    Retrying {
        attempt: u32,
        next_eligible_at: DateTime<Utc>,
    },
    /// Attempts exhausted; the job is Failed permanently.
    Failed { attempts: u32 },
    /// The lease no longer matched (the job was recovered or finished by
    /// someone else). Nothing was written.
    LeaseLost,
}

impl FailureOutcome {
    /// State the job moved to, if the transition happened.
    pub fn state(&self) -> Option<JobState> {
        match self {
            FailureOutcome::Retrying { .. } => Some(JobState::Waiting),
            FailureOutcome::Failed { .. } => Some(JobState::Failed),
            FailureOutcome::LeaseLost => None,
        }
    }
}

/// Failure message recorded for a job that exceeded the stall timeout.
pub fn stall_error(job_id: &str) -> String {
    QueueError::Stalled {
        job_id: job_id.to_string(),
    }
    .to_string()
}

/// Persistent job store backed by rusqlite.
pub struct JobStore {
    /// `None` once the store is closed.
    db: RwLock<Option<Database>>,
    policy: RetryPolicy,
    stall_timeout: Duration,
}

impl JobStore {
    pub fn new(db: Database, policy: RetryPolicy, stall_timeout: Duration) -> Self {
        Self {
            db: RwLock::new(Some(db)),
            policy,
            stall_timeout,
        }
    }

    /// Gets a cloned database handle, or `Closed` after [`JobStore::close`].
    fn database(&self) -> Result<Database, DatabaseError> {
        let guard = match self.db.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone().ok_or(DatabaseError::Closed)
    }

    /// Detaches the database. Later operations fail with `Closed`.
    pub fn close(&self) {
        let mut guard = match self.db.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if guard.take().is_some() {
            log::info!("Job store closed");
        }
    }

    /// Persists a new Waiting job, eligible immediately.
    pub fn enqueue(
        &self,
        file_ref: &FileRef,
        priority: i32,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        if max_attempts == 0 {
            return Err(QueueError::Enqueue(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let db = self
            .database()
            .map_err(|e| QueueError::Enqueue(e.to_string()))?;

        let now_ms = to_millis(now);
        let mut row = JobRow {
            seq: 0,
            id: Uuid::new_v4().to_string(),
            file_id: file_ref.file_id.clone(),
            file_path: file_ref.path.to_string_lossy().into_owned(),
            mime_type: file_ref.mime_type.clone(),
            state: JobState::Waiting.as_str().to_string(),
            priority,
            attempts: 0,
            max_attempts,
            next_eligible_at: now_ms,
            last_error: None,
            progress: 0,
            lease_token: None,
            claimed_at: None,
            created_at: now_ms,
            updated_at: now_ms,
            finished_at: None,
        };
        row.seq = job_repo::insert(&db, &row).map_err(|e| QueueError::Enqueue(e.to_string()))?;

        log::debug!(
            "Enqueued job {} for file {} (priority {})",
            row.id,
            row.file_id,
            priority
        );

        Ok(Job::from_row(row)?)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        let db = self.database()?;
        Ok(job_repo::find_by_id(&db, job_id)?
            .map(Job::from_row)
            .transpose()?)
    }

    /// Every job recorded for a file, newest first.
    pub fn jobs_for_file(&self, file_id: &str) -> Result<Vec<Job>, QueueError> {
        let db = self.database()?;
        let rows = job_repo::list_for_file(&db, file_id)?;
        Ok(rows
            .into_iter()
            .map(Job::from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Claims the next eligible job, or `None` when nothing is eligible.
    pub fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>, QueueError> {
        let db = self.database()?;
        let lease_token = Uuid::new_v4().to_string();

        let Some(row) = job_repo::claim_next(&db, to_millis(now), &lease_token)? else {
            return Ok(None);
        };

        let job = Job::from_row(row)?;
        log::debug!(
            "Claimed job {} (attempt {}/{})",
            job.id,
            job.attempts,
            job.max_attempts
        );
        Ok(Some(ClaimedJob { job, lease_token }))
    }

    /// Persists progress of a held job. Returns `false` if the lease was lost.
    pub fn report_progress(
        &self,
        claimed: &ClaimedJob,
        progress: u8,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let db = self.database()?;
        Ok(job_repo::update_progress(
            &db,
            &claimed.job.id,
            &claimed.lease_token,
            progress.min(100),
            to_millis(now),
        )?)
    }

    /// Active → Completed. Returns `false` if the lease was lost.
    pub fn complete(&self, claimed: &ClaimedJob, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let db = self.database()?;
        let done = job_repo::complete(&db, &claimed.job.id, &claimed.lease_token, to_millis(now))?;
        if !done {
            log::warn!(
                "Job {} could not be completed: lease no longer held",
                claimed.job.id
            );
        }
        Ok(done)
    }

    /// Hands a failed attempt to the retry policy and applies its decision.
    pub fn record_failure(
        &self,
        claimed: &ClaimedJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, QueueError> {
        let db = self.database()?;
        let job = &claimed.job;
        let now_ms = to_millis(now);

        match self.policy.decide(job.attempts, job.max_attempts) {
            RetryDecision::Retry { delay } => {
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                let eligible_ms = now_ms.saturating_add(delay_ms);
                let next_eligible_at = from_millis(eligible_ms, "jobs")?;

                if !job_repo::rearm(&db, &job.id, &claimed.lease_token, error, eligible_ms, now_ms)? {
                    return Ok(FailureOutcome::LeaseLost);
                }
                log::info!(
                    "Job {} attempt {}/{} failed, retrying in {}ms: {}",
                    job.id,
                    job.attempts,
                    job.max_attempts,
                    delay_ms,
                    error
                );
                Ok(FailureOutcome::Retrying {
                    attempt: job.attempts,
                    next_eligible_at,
                })
            }
            RetryDecision::GiveUp => {
                if !job_repo::fail(&db, &job.id, &claimed.lease_token, error, now_ms)? {
                    return Ok(FailureOutcome::LeaseLost);
                }
                log::warn!(
                    "Job {} failed permanently after {} attempts: {}",
                    job.id,
                    job.attempts,
                    error
                );
                Ok(FailureOutcome::Failed {
                    attempts: job.attempts,
                })
            }
        }
    }

    /// Active jobs claimed more than `stall_timeout` ago, with the leases
    /// their holders were given. Pass each to [`JobStore::record_failure`]
    /// with [`stall_error`] to take it back.
    pub fn stalled_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ClaimedJob>, QueueError> {
        let db = self.database()?;
        let stall_ms = i64::try_from(self.stall_timeout.as_millis()).unwrap_or(i64::MAX);
        let cutoff = to_millis(now).saturating_sub(stall_ms);

        let mut stalled = Vec::new();
        for row in job_repo::find_stalled(&db, cutoff)? {
            let Some(lease_token) = row.lease_token.clone() else {
                log::warn!("Active job {} has no lease token, skipping", row.id);
                continue;
            };
            let id = row.id.clone();
            match Job::from_row(row) {
                Ok(job) => stalled.push(ClaimedJob { job, lease_token }),
                Err(e) => log::error!("Skipping unreadable stalled job {}: {}", id, e),
            }
        }
        Ok(stalled)
    }

    /// Current per-state counts.
    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let db = self.database()?;
        Ok(QueueStats::from_counts(job_repo::state_counts(&db)?))
    }

    /// Deletes jobs in a terminal `state` that finished before `cutoff`.
    /// Waiting and Active jobs are never removed.
    pub fn remove_finished_before(
        &self,
        state: JobState,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        if !state.is_terminal() {
            return Ok(0);
        }
        let db = self.database()?;
        Ok(job_repo::delete_finished_before(
            &db,
            state.as_str(),
            to_millis(cutoff),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use chrono::TimeDelta;

    use super::*;

    fn test_store() -> JobStore {
        let db = Database::open_in_memory().expect("Failed to create test database");
        JobStore::new(db, RetryPolicy::default(), Duration::from_secs(300))
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn file(id: &str) -> FileRef {
        FileRef::with_mime_type(id, format!("/uploads/{}.txt", id), "text/plain")
    }

    #[test]
    fn test_enqueue_creates_waiting_job() {
        let store = test_store();
        let job = store.enqueue(&file("f1"), 1, 3, at(1_000)).unwrap();

        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.next_eligible_at, at(1_000));
        assert!(job.seq > 0);

        let fetched = store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched.file_ref, file("f1"));
    }

    #[test]
    fn test_enqueue_rejects_zero_attempts() {
        let store = test_store();
        let err = store.enqueue(&file("f1"), 1, 0, at(0)).unwrap_err();
        assert!(matches!(err, QueueError::Enqueue(_)));
    }

    #[test]
    fn test_closed_store() {
        let store = test_store();
        store.close();

        let err = store.enqueue(&file("f1"), 1, 3, at(0)).unwrap_err();
        assert!(matches!(err, QueueError::Enqueue(_)));
        assert!(matches!(
            store.claim_next(at(0)),
            Err(QueueError::Database(DatabaseError::Closed))
        ));
    }

    #[test]
    fn test_failure_rearms_with_backoff_then_fails() {
        let store = test_store();
        let job = store.enqueue(&file("f1"), 1, 3, at(0)).unwrap();

        let first = store.claim_next(at(0)).unwrap().unwrap();
        assert_eq!(first.attempt(), 1);
        let outcome = store.record_failure(&first, "boom 1", at(100)).unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                attempt: 1,
                next_eligible_at: at(2_100)
            }
        );

        assert!(store.claim_next(at(2_099)).unwrap().is_none());
        let second = store.claim_next(at(2_100)).unwrap().unwrap();
        let outcome = store.record_failure(&second, "boom 2", at(2_200)).unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                attempt: 2,
                next_eligible_at: at(6_200)
            }
        );

        let third = store.claim_next(at(6_200)).unwrap().unwrap();
        let outcome = store.record_failure(&third, "boom 3", at(6_300)).unwrap();
        assert_eq!(outcome, FailureOutcome::Failed { attempts: 3 });

        let failed = store.get(&job.id).unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts, failed.max_attempts);
        assert_eq!(failed.last_error.as_deref(), Some("boom 3"));

        assert!(store.claim_next(at(10_000_000)).unwrap().is_none());
    }

    #[test]
    fn test_single_attempt_job_fails_immediately() {
        let store = test_store();
        store.enqueue(&file("f1"), 1, 1, at(0)).unwrap();
        let claimed = store.claim_next(at(0)).unwrap().unwrap();
        assert_eq!(
            store.record_failure(&claimed, "nope", at(1)).unwrap(),
            FailureOutcome::Failed { attempts: 1 }
        );
    }

    #[test]
    fn test_complete_clears_error() {
        let store = test_store();
        let job = store.enqueue(&file("f1"), 1, 3, at(0)).unwrap();
        let first = store.claim_next(at(0)).unwrap().unwrap();
        store.record_failure(&first, "transient", at(1)).unwrap();

        let second = store.claim_next(at(10_000)).unwrap().unwrap();
        assert!(store.report_progress(&second, 50, at(10_001)).unwrap());
        assert!(store.complete(&second, at(10_002)).unwrap());

        let done = store.get(&job.id).unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.last_error.is_none());
        assert_eq!(done.finished_at, Some(at(10_002)));
    }

    #[test]
    fn test_stalled_job_is_rearmed_and_old_holder_fenced() {
        let store = test_store();
        let job = store.enqueue(&file("f1"), 1, 3, at(0)).unwrap();
        let stale = store.claim_next(at(0)).unwrap().unwrap();

        assert!(store.stalled_jobs(at(300_000)).unwrap().is_empty());

        let stalled = store.stalled_jobs(at(300_001)).unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].job.id, job.id);
        let error = stall_error(&job.id);
        assert!(error.contains("stalled"));
        let outcome = store
            .record_failure(&stalled[0], &error, at(300_001))
            .unwrap();
        assert_eq!(outcome.state(), Some(JobState::Waiting));
        assert_eq!(
            store.get(&job.id).unwrap().unwrap().last_error.as_deref(),
            Some(error.as_str())
        );
        assert!(store.stalled_jobs(at(300_002)).unwrap().is_empty());

        let fresh = store.claim_next(at(400_000)).unwrap().unwrap();
        assert_eq!(fresh.attempt(), 2);

        // The stalled holder wakes up and tries to finish.
        assert!(!store.complete(&stale, at(400_001)).unwrap());
        assert_eq!(
            store.record_failure(&stale, "late", at(400_001)).unwrap(),
            FailureOutcome::LeaseLost
        );
        assert!(store.complete(&fresh, at(400_002)).unwrap());
    }

    #[test]
    fn test_stall_on_last_attempt_fails_job() {
        let store = test_store();
        let job = store.enqueue(&file("f1"), 1, 1, at(0)).unwrap();
        store.claim_next(at(0)).unwrap().unwrap();

        let stalled = store.stalled_jobs(at(1_000_000)).unwrap();
        let outcome = store
            .record_failure(&stalled[0], &stall_error(&job.id), at(1_000_000))
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed { attempts: 1 });
        assert_eq!(
            store.get(&job.id).unwrap().unwrap().state,
            JobState::Failed
        );
    }

    #[test]
    fn test_stalled_jobs_skips_unreadable_rows() {
        let store = test_store();
        let bad = store.enqueue(&file("bad"), 1, 3, at(0)).unwrap();
        let good = store.enqueue(&file("good"), 2, 3, at(0)).unwrap();
        store.claim_next(at(0)).unwrap().unwrap();
        store.claim_next(at(0)).unwrap().unwrap();

        let db = store.database().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET created_at = ?1 WHERE id = ?2",
                rusqlite::params![i64::MAX, bad.id],
            )?;
            Ok(())
        })
        .unwrap();

        let stalled = store.stalled_jobs(at(1_000_000)).unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].job.id, good.id);
    }

    #[test]
    fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(test_store());
        let jobs = 40;
        for i in 0..jobs {
            store.enqueue(&file(&format!("f{}", i)), 1, 3, at(0)).unwrap();
        }

        let claimed = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let claimed = Arc::clone(&claimed);
                std::thread::spawn(move || {
                    while let Some(job) = store.claim_next(at(1)).unwrap() {
                        claimed.lock().unwrap().push(job.job.id.clone());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let claimed = claimed.lock().unwrap();
        let unique: HashSet<_> = claimed.iter().collect();
        assert_eq!(claimed.len(), jobs);
        assert_eq!(unique.len(), jobs);
        assert_eq!(store.stats().unwrap().active, jobs as u64);
    }

    #[test]
    fn test_stats_match_distribution() {
        let store = test_store();
        for i in 0..6 {
            store.enqueue(&file(&format!("f{}", i)), 1, 1, at(0)).unwrap();
        }

        let a = store.claim_next(at(0)).unwrap().unwrap();
        let b = store.claim_next(at(0)).unwrap().unwrap();
        let c = store.claim_next(at(0)).unwrap().unwrap();
        store.claim_next(at(0)).unwrap().unwrap();
        store.complete(&a, at(1)).unwrap();
        store.complete(&b, at(1)).unwrap();
        store.record_failure(&c, "bad", at(1)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.waiting, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, 6);
    }

    #[test]
    fn test_remove_finished_before_skips_live_states() {
        let store = test_store();
        let waiting = store.enqueue(&file("w"), 5, 3, at(0)).unwrap();
        let done = store.enqueue(&file("d"), 1, 3, at(0)).unwrap();
        let claimed = store.claim_next(at(0)).unwrap().unwrap();
        assert_eq!(claimed.job.id, done.id);
        store.complete(&claimed, at(0)).unwrap();

        let far_future = at(0) + TimeDelta::days(365);
        for state in JobState::ALL {
            store.remove_finished_before(state, far_future).unwrap();
        }

        assert!(store.get(&waiting.id).unwrap().is_some());
        assert!(store.get(&done.id).unwrap().is_none());
    }

    #[test]
    fn test_jobs_for_file() {
        let store = test_store();
        let first = store.enqueue(&file("f1"), 1, 3, at(0)).unwrap();
        let second = store.enqueue(&file("f1"), 1, 3, at(1)).unwrap();
        store.enqueue(&file("f2"), 1, 3, at(2)).unwrap();

        let ids: Vec<String> = store
            .jobs_for_file("f1")
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
