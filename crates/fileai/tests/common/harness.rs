//! Test harness for isolated queue runs.
//!
//! Each `TestHarness` owns a temporary directory holding the SQLite database
//! and uploaded files, plus a queue configuration with millisecond-scale
//! delays so retry and stall paths finish quickly.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use fileai::{
    AnalysisService, Analyzer, Database, FileRecord, Job, JobState, NewFile, QueueConfig,
};

/// How long `wait_*` helpers poll before giving up.
const WAIT_LIMIT: Duration = Duration::from_secs(15);
const WAIT_STEP: Duration = Duration::from_millis(10);

pub struct TestHarness {
    temp_dir: TempDir,
    pub uploads_dir: PathBuf,
    pub db_path: PathBuf,
    pub db: Database,
    pub config: QueueConfig,
}

impl TestHarness {
    /// Harness with fast defaults: 2 workers, 3 attempts, 50ms base delay.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut QueueConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let uploads_dir = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&uploads_dir).expect("Failed to create uploads dir");

        let db_path = temp_dir.path().join("data").join("fileai.db");
        let db = Database::open(&db_path).expect("Failed to open test database");

        let mut config = QueueConfig {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
            default_priority: 1,
            job_timeout: Duration::from_millis(250),
            stall_timeout: Duration::from_secs(2),
            completed_retention: Duration::from_secs(3600),
            failed_retention: Duration::from_secs(7200),
            worker_count: 2,
            poll_interval: Duration::from_millis(10),
            reap_interval: Duration::from_secs(3600),
        };
        adjust(&mut config);

        Self {
            temp_dir,
            uploads_dir,
            db_path,
            db,
            config,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a file into the uploads directory and describes it as an upload.
    pub fn write_upload(&self, name: &str, content: &str) -> NewFile {
        self.write_upload_bytes(name, content.as_bytes())
    }

    pub fn write_upload_bytes(&self, name: &str, content: &[u8]) -> NewFile {
        let path = self.uploads_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write upload");
        NewFile {
            filename: name.to_string(),
            original_name: name.to_string(),
            path: path.to_string_lossy().into_owned(),
            mime_type: mime_guess::from_path(&path)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string(),
            size: content.len() as u64,
        }
    }

    /// Starts a service over the harness database.
    pub fn start(&self, analyzer: Arc<dyn Analyzer>) -> AnalysisService {
        AnalysisService::open(self.db.clone(), analyzer, self.config.clone())
            .expect("Failed to start analysis service")
    }
}

/// Polls until the job reaches a terminal state.
pub async fn wait_for_terminal(service: &AnalysisService, job_id: &str) -> Job {
    let started = std::time::Instant::now();
    loop {
        let job = service
            .job(job_id)
            .expect("Failed to read job")
            .expect("Job disappeared");
        if job.state.is_terminal() {
            return job;
        }
        assert!(
            started.elapsed() < WAIT_LIMIT,
            "job {} still {} after {:?}",
            job_id,
            job.state,
            WAIT_LIMIT
        );
        tokio::time::sleep(WAIT_STEP).await;
    }
}

/// Polls until no job is waiting or active.
pub async fn wait_until_drained(service: &AnalysisService) {
    let started = std::time::Instant::now();
    loop {
        let stats = service.stats().expect("Failed to read stats");
        if stats.pending() == 0 {
            return;
        }
        assert!(
            started.elapsed() < WAIT_LIMIT,
            "queue not drained: {:?}",
            stats
        );
        tokio::time::sleep(WAIT_STEP).await;
    }
}

pub async fn file_record(service: &AnalysisService, file_id: &str) -> FileRecord {
    service
        .files()
        .get(file_id)
        .await
        .expect("Failed to read file record")
        .expect("File record missing")
}

pub fn assert_state(job: &Job, state: JobState) {
    assert_eq!(
        job.state, state,
        "job {} in unexpected state (last error: {:?})",
        job.id, job.last_error
    );
}
