use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::analysis::Analyzer;
use crate::broadcast::{JobProgressBroadcaster, JobProgressTracker};
use crate::db::{blocking, DatabaseError};
use crate::error::QueueError;
use crate::files::{FileRecordStore, FileUpdate};
use crate::queue::config::QueueConfig;
use crate::queue::job::ClaimedJob;
use crate::queue::store::{stall_error, FailureOutcome, JobStore};

const FILE_WRITE_ATTEMPTS: u32 = 3;
const FILE_WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a worker needs to run jobs. Shared by all workers of a pool.
pub struct WorkerContext {
    pub store: Arc<JobStore>,
    pub files: Arc<dyn FileRecordStore>,
    pub analyzer: Arc<dyn Analyzer>,
    pub progress: JobProgressBroadcaster,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
}

impl WorkerContext {
    pub fn new(
        store: Arc<JobStore>,
        files: Arc<dyn FileRecordStore>,
        analyzer: Arc<dyn Analyzer>,
        progress: JobProgressBroadcaster,
        config: &QueueConfig,
    ) -> Self {
        Self {
            store,
            files,
            analyzer,
            progress,
            job_timeout: config.job_timeout,
            poll_interval: config.poll_interval,
        }
    }
}

/// A fixed set of tokio tasks that claim and execute jobs until shut down.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers on the current tokio runtime. `wake` is
    /// notified by the producer whenever a job is enqueued.
    pub fn start(context: WorkerContext, worker_count: usize, wake: Arc<Notify>) -> Self {
        let worker_count = worker_count.max(1);
        let context = Arc::new(context);
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let context = Arc::clone(&context);
                let shutdown = Arc::clone(&shutdown);
                let wake = Arc::clone(&wake);
                tokio::spawn(run_worker(worker_id, context, shutdown, wake))
            })
            .collect();

        info!("Started {} analysis workers", worker_count);

        Self {
            workers,
            shutdown,
            wake,
        }
    }

    /// Stops claiming new jobs. Jobs already in flight run to completion.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to exit.
    pub async fn wait(self) {
        let results = join_all(self.workers).await;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(()) => debug!("Worker {} finished", i),
                Err(e) if e.is_panic() => error!("Worker {} panicked: {}", i, e),
                Err(e) => warn!("Worker {} was cancelled: {}", i, e),
            }
        }

        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    context: Arc<WorkerContext>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        context.recover_stalled().await;

        let now = Utc::now();
        match context.with_store(move |store| store.claim_next(now)).await {
            Ok(Some(claimed)) => {
                debug!(
                    "Worker {} processing job {} (file {})",
                    worker_id, claimed.job.id, claimed.job.file_ref.file_id
                );
                context.process(claimed).await;
            }
            Ok(None) => context.idle(&wake).await,
            Err(QueueError::Database(DatabaseError::Closed)) => {
                debug!("Worker {} found the job store closed", worker_id);
                break;
            }
            Err(e) => {
                error!("Worker {} failed to claim a job: {}", worker_id, e);
                context.idle(&wake).await;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

impl WorkerContext {
    /// Runs a job store operation off the async worker threads.
    async fn with_store<T, F>(&self, op: F) -> Result<T, QueueError>
    where
        F: FnOnce(&JobStore) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        blocking(move || op(&store)).await
    }

    async fn idle(&self, wake: &Notify) {
        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }

    /// Takes back stalled jobs. Like any failed attempt, the file's
    /// analysis error is written before the job is re-armed or failed.
    async fn recover_stalled(&self) {
        let now = Utc::now();
        let stalled = match self.with_store(move |store| store.stalled_jobs(now)).await {
            Ok(stalled) => stalled,
            Err(QueueError::Database(DatabaseError::Closed)) => return,
            Err(e) => {
                error!("Stall recovery failed: {}", e);
                return;
            }
        };

        for claimed in stalled {
            let job = &claimed.job;
            let error = stall_error(&job.id);
            warn!(
                "Job {} stalled on attempt {}/{}",
                job.id,
                claimed.attempt(),
                job.max_attempts
            );

            self.record_file_failure(&job.file_ref.file_id, &error).await;

            let tracker = self
                .progress
                .track(&job.id, &job.file_ref.file_id, claimed.attempt());
            match self.transition_failed(&claimed, &error).await {
                Ok(FailureOutcome::LeaseLost) => {
                    debug!("Stalled job {} was taken back by another worker", job.id)
                }
                Ok(outcome) => {
                    if let Some(state) = outcome.state() {
                        tracker.failed(state, &error);
                    }
                }
                Err(QueueError::Database(DatabaseError::Closed)) => return,
                Err(e) => error!("Failed to recover stalled job {}: {}", job.id, e),
            }
        }
    }

    async fn process(&self, claimed: ClaimedJob) {
        let job = &claimed.job;
        let tracker = self
            .progress
            .track(&job.id, &job.file_ref.file_id, claimed.attempt());

        match self.execute(&claimed, &tracker).await {
            Ok(()) => {}
            Err(QueueError::ReferenceGone { file_id }) => {
                info!(
                    "File {} was deleted before job {} finished, nothing to analyze",
                    file_id, job.id
                );
                self.finish(&claimed, &tracker, "File no longer exists").await;
            }
            Err(e) => self.fail_attempt(&claimed, &tracker, &e.to_string()).await,
        }
    }

    async fn execute(
        &self,
        claimed: &ClaimedJob,
        tracker: &JobProgressTracker,
    ) -> Result<(), QueueError> {
        let file_ref = &claimed.job.file_ref;
        let gone = || QueueError::ReferenceGone {
            file_id: file_ref.file_id.clone(),
        };

        self.set_progress(claimed, tracker, 10, "Resolving file").await;
        let record = self.files.get(&file_ref.file_id).await?.ok_or_else(gone)?;
        let mime_type = file_ref
            .mime_type
            .clone()
            .unwrap_or_else(|| record.mime_type.clone());

        let result = tokio::time::timeout(
            self.job_timeout,
            self.analyzer.analyze(file_ref.path(), &mime_type),
        )
        .await
        .map_err(|_| QueueError::Timeout(self.job_timeout))??;

        self.set_progress(claimed, tracker, 80, "Saving analysis results").await;
        let update = FileUpdate::analysis_succeeded(result.tags, result.summary, Utc::now());
        if !self.write_file_update(&file_ref.file_id, &update).await? {
            return Err(gone());
        }

        self.set_progress(claimed, tracker, 100, "Analysis saved").await;
        self.finish(claimed, tracker, "Analysis complete").await;
        Ok(())
    }

    async fn finish(&self, claimed: &ClaimedJob, tracker: &JobProgressTracker, message: &str) {
        let held = claimed.clone();
        let now = Utc::now();
        match self.with_store(move |store| store.complete(&held, now)).await {
            Ok(true) => {
                info!("Job {} completed", claimed.job.id);
                tracker.completed(message);
            }
            Ok(false) => {}
            Err(e) => error!("Failed to mark job {} completed: {}", claimed.job.id, e),
        }
    }

    async fn fail_attempt(&self, claimed: &ClaimedJob, tracker: &JobProgressTracker, error: &str) {
        let job = &claimed.job;
        warn!(
            "Job {} attempt {}/{} failed: {}",
            job.id,
            claimed.attempt(),
            job.max_attempts,
            error
        );

        self.record_file_failure(&job.file_ref.file_id, error).await;

        match self.transition_failed(claimed, error).await {
            Ok(FailureOutcome::LeaseLost) => {
                warn!("Job {} lease lost before its failure was recorded", job.id)
            }
            Ok(outcome) => {
                if let Some(state) = outcome.state() {
                    tracker.failed(state, error);
                }
            }
            Err(e) => error!("Failed to record failure of job {}: {}", job.id, e),
        }
    }

    async fn transition_failed(
        &self,
        claimed: &ClaimedJob,
        error: &str,
    ) -> Result<FailureOutcome, QueueError> {
        let (held, error, now) = (claimed.clone(), error.to_string(), Utc::now());
        self.with_store(move |store| store.record_failure(&held, &error, now))
            .await
    }

    /// Best effort: errors are logged, never propagated.
    async fn record_file_failure(&self, file_id: &str, error: &str) {
        match self
            .files
            .update(file_id, &FileUpdate::analysis_failed(error))
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("File {} is gone, analysis error not recorded", file_id),
            Err(e) => error!("Failed to record analysis error for file {}: {}", file_id, e),
        }
    }

    /// Writes an update, retrying transient store errors. The update is
    /// idempotent, so a retry after an unseen success is harmless.
    async fn write_file_update(
        &self,
        file_id: &str,
        update: &FileUpdate,
    ) -> Result<bool, QueueError> {
        let mut attempt = 1;
        loop {
            match self.files.update(file_id, update).await {
                Ok(found) => return Ok(found),
                Err(e) if attempt < FILE_WRITE_ATTEMPTS => {
                    warn!(
                        "File {} update failed (attempt {}/{}): {}",
                        file_id, attempt, FILE_WRITE_ATTEMPTS, e
                    );
                    tokio::time::sleep(FILE_WRITE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn set_progress(
        &self,
        claimed: &ClaimedJob,
        tracker: &JobProgressTracker,
        progress: u8,
        message: &str,
    ) {
        let (held, now) = (claimed.clone(), Utc::now());
        match self
            .with_store(move |store| store.report_progress(&held, progress, now))
            .await
        {
            Ok(true) => tracker.progress(progress, message),
            Ok(false) => debug!("Job {} no longer held, progress dropped", claimed.job.id),
            Err(e) => warn!("Failed to persist progress of job {}: {}", claimed.job.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;

    use super::*;
    use crate::analysis::{AnalysisError, AnalysisResult};
    use crate::db::Database;
    use crate::files::{FileRecord, NewFile, SqliteFileStore};
    use crate::queue::backoff::RetryPolicy;
    use crate::queue::{FileRef, JobState};

    struct FixedAnalyzer;

    #[async_trait]
    impl Analyzer for FixedAnalyzer {
        async fn analyze(
            &self,
            _path: &Path,
            _mime_type: &str,
        ) -> Result<AnalysisResult, AnalysisError> {
            Ok(AnalysisResult::new(&["invoice", "finance"], "An invoice."))
        }
    }

    struct Fixture {
        store: Arc<JobStore>,
        files: Arc<SqliteFileStore>,
        context: WorkerContext,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(JobStore::new(
            db.clone(),
            RetryPolicy::default(),
            Duration::from_secs(300),
        ));
        let files = Arc::new(SqliteFileStore::new(db));
        let config = QueueConfig {
            poll_interval: Duration::from_millis(10),
            ..QueueConfig::default()
        };
        let context = WorkerContext::new(
            Arc::clone(&store),
            files.clone(),
            Arc::new(FixedAnalyzer),
            JobProgressBroadcaster::new(64),
            &config,
        );
        Fixture {
            store,
            files,
            context,
        }
    }

    async fn upload(files: &SqliteFileStore) -> String {
        files
            .create(NewFile {
                filename: "invoice.txt".to_string(),
                original_name: "invoice.txt".to_string(),
                path: "/uploads/invoice.txt".to_string(),
                mime_type: "text/plain".to_string(),
                size: 12,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_success_updates_file_and_completes() {
        let fx = fixture();
        let file_id = upload(&fx.files).await;
        let job = fx
            .store
            .enqueue(&FileRef::new(&file_id, "/uploads/invoice.txt"), 1, 3, Utc::now())
            .unwrap();
        let mut rx = fx.context.progress.subscribe();

        let claimed = fx.store.claim_next(Utc::now()).unwrap().unwrap();
        fx.context.process(claimed).await;

        let job = fx.store.get(&job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        let record = fx.files.get(&file_id).await.unwrap().unwrap();
        assert!(record.analyzed);
        assert_eq!(record.ai_tags, vec!["invoice", "finance"]);
        assert_eq!(record.summary, "An invoice.");
        assert!(record.analysis_date.is_some());

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            progress.push(event.progress);
        }
        assert_eq!(progress, vec![10, 80, 100, 100]);
    }

    #[tokio::test]
    async fn test_deleted_file_completes_silently() {
        let fx = fixture();
        let job = fx
            .store
            .enqueue(&FileRef::new("missing", "/uploads/gone.txt"), 1, 3, Utc::now())
            .unwrap();

        let claimed = fx.store.claim_next(Utc::now()).unwrap().unwrap();
        fx.context.process(claimed).await;

        let job = fx.store.get(&job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 1);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn test_pool_drains_and_shuts_down() {
        let fx = fixture();
        let file_id = upload(&fx.files).await;
        let job = fx
            .store
            .enqueue(&FileRef::new(&file_id, "/uploads/invoice.txt"), 1, 3, Utc::now())
            .unwrap();

        let store = Arc::clone(&fx.store);
        let pool = WorkerPool::start(fx.context, 2, Arc::new(Notify::new()));
        assert_eq!(pool.worker_count(), 2);

        for _ in 0..200 {
            if store.stats().unwrap().completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.shutdown();
        assert!(pool.is_shutdown());
        pool.wait().await;

        assert_eq!(
            store.get(&job.id).unwrap().unwrap().state,
            JobState::Completed
        );
    }

    /// Records the state of the file's job whenever the file is updated.
    struct ObservingFiles {
        inner: SqliteFileStore,
        store: Arc<JobStore>,
        seen: std::sync::Mutex<Vec<JobState>>,
    }

    #[async_trait]
    impl FileRecordStore for ObservingFiles {
        async fn create(&self, file: NewFile) -> Result<String, DatabaseError> {
            self.inner.create(file).await
        }

        async fn update(&self, id: &str, update: &FileUpdate) -> Result<bool, DatabaseError> {
            let jobs = self.store.jobs_for_file(id).unwrap();
            self.seen.lock().unwrap().push(jobs[0].state);
            self.inner.update(id, update).await
        }

        async fn get(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
            self.inner.get(id).await
        }

        async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_stall_recovery_records_file_error_before_rearming() {
        let fx = fixture();
        let files = Arc::new(ObservingFiles {
            inner: (*fx.files).clone(),
            store: Arc::clone(&fx.store),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let context = WorkerContext::new(
            Arc::clone(&fx.store),
            files.clone(),
            Arc::new(FixedAnalyzer),
            JobProgressBroadcaster::new(64),
            &QueueConfig::default(),
        );

        let file_id = upload(&fx.files).await;
        let long_ago = Utc::now() - chrono::TimeDelta::minutes(10);
        let job = fx
            .store
            .enqueue(&FileRef::new(&file_id, "/uploads/invoice.txt"), 1, 3, long_ago)
            .unwrap();
        fx.store.claim_next(long_ago).unwrap().unwrap();

        context.recover_stalled().await;

        assert_eq!(*files.seen.lock().unwrap(), vec![JobState::Active]);
        let job = fx.store.get(&job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.last_error, Some(stall_error(&job.id)));

        let record = fx.files.get(&file_id).await.unwrap().unwrap();
        assert!(!record.analyzed);
        assert_eq!(record.analysis_error, Some(stall_error(&job.id)));
    }
}
