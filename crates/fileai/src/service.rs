//! Service lifecycle: wires the job store, file store, producer, worker pool
//! and reaper together.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::analysis::Analyzer;
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::Config;
use crate::db::{default_database_path, Database, DatabaseError};
use crate::error::{QueueError, Result};
use crate::files::{FileRecordStore, NewFile, SqliteFileStore};
use crate::queue::{
    EnqueueOptions, FileRef, Job, JobHandle, JobStore, Producer, QueueConfig, QueueStats,
    Reaper, WorkerContext, WorkerPool,
};

/// Outcome of an upload. The file is stored even when its analysis job
/// could not be queued; `warning` then says why.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl UploadReceipt {
    pub fn analysis_queued(&self) -> bool {
        self.job.is_some()
    }
}

/// A running analysis queue.
///
/// Must be opened from within a tokio runtime; workers and the reaper run as
/// tasks on it until [`AnalysisService::shutdown`].
pub struct AnalysisService {
    store: Arc<JobStore>,
    files: Arc<dyn FileRecordStore>,
    producer: Producer,
    progress: JobProgressBroadcaster,
    pool: WorkerPool,
    reaper: Arc<Reaper>,
    reaper_handle: JoinHandle<()>,
    config: QueueConfig,
}

impl AnalysisService {
    /// Starts the queue over `db`, storing file records in the same database.
    pub fn open(db: Database, analyzer: Arc<dyn Analyzer>, config: QueueConfig) -> Result<Self> {
        let files = Arc::new(SqliteFileStore::new(db.clone()));
        Self::with_file_store(db, files, analyzer, config)
    }

    /// Starts the queue with an external file record store. Fails without
    /// starting anything if `config` does not validate.
    pub fn with_file_store(
        db: Database,
        files: Arc<dyn FileRecordStore>,
        analyzer: Arc<dyn Analyzer>,
        config: QueueConfig,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(JobStore::new(
            db,
            config.retry_policy(),
            config.stall_timeout,
        ));
        let progress = JobProgressBroadcaster::default();
        let wake = Arc::new(Notify::new());

        let producer = Producer::new(
            Arc::clone(&store),
            progress.clone(),
            Arc::clone(&wake),
            config.default_priority,
            config.max_attempts,
        );

        let context = WorkerContext::new(
            Arc::clone(&store),
            Arc::clone(&files),
            analyzer,
            progress.clone(),
            &config,
        );
        let pool = WorkerPool::start(context, config.worker_count, wake);

        let reaper = Arc::new(Reaper::new(Arc::clone(&store), &config));
        let reaper_handle = reaper.start();

        log::info!(
            "Analysis service started ({} workers, max {} attempts)",
            pool.worker_count(),
            config.max_attempts
        );

        Ok(Self {
            store,
            files,
            producer,
            progress,
            pool,
            reaper,
            reaper_handle,
            config,
        })
    }

    /// Opens the database at `path` (running migrations) and starts the queue.
    pub fn open_path(
        path: &Path,
        analyzer: Arc<dyn Analyzer>,
        config: QueueConfig,
    ) -> Result<Self> {
        let db = Database::open(path)?;
        Self::open(db, analyzer, config)
    }

    /// Starts the queue from a loaded configuration file.
    pub fn from_config(config: &Config, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        let path = match &config.database_path {
            Some(path) => Path::new(path).to_path_buf(),
            None => default_database_path().ok_or_else(|| DatabaseError::Io {
                path: Path::new("~/.fileai").to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "home directory not found",
                ),
            })?,
        };
        Self::open_path(&path, analyzer, QueueConfig::from_config(config))
    }

    /// Stores a new file and queues its analysis.
    ///
    /// Fails only when the file record cannot be created. A queueing failure
    /// is reported through the receipt's `warning`.
    pub async fn ingest(&self, file: NewFile, options: EnqueueOptions) -> Result<UploadReceipt> {
        let path = file.path.clone();
        let mime_type = file.mime_type.clone();
        let file_id = self.files.create(file).await?;

        let file_ref = FileRef::with_mime_type(&file_id, path, &mime_type);
        match self.producer.enqueue(file_ref, options) {
            Ok(handle) => Ok(UploadReceipt {
                file_id,
                job: Some(handle),
                warning: None,
            }),
            Err(e) => {
                log::warn!("File {} stored but analysis not queued: {}", file_id, e);
                Ok(UploadReceipt {
                    file_id,
                    job: None,
                    warning: Some(format!("analysis pending: {}", e)),
                })
            }
        }
    }

    /// Queues analysis of an already stored file.
    pub fn enqueue(
        &self,
        file_ref: FileRef,
        options: EnqueueOptions,
    ) -> std::result::Result<JobHandle, QueueError> {
        self.producer.enqueue(file_ref, options)
    }

    pub fn stats(&self) -> std::result::Result<QueueStats, QueueError> {
        self.store.stats()
    }

    pub fn job(&self, job_id: &str) -> std::result::Result<Option<Job>, QueueError> {
        self.store.get(job_id)
    }

    pub fn jobs_for_file(&self, file_id: &str) -> std::result::Result<Vec<Job>, QueueError> {
        self.store.jobs_for_file(file_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.progress.subscribe()
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn files(&self) -> &Arc<dyn FileRecordStore> {
        &self.files
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Stops claiming, lets in-flight jobs finish, stops the reaper and
    /// closes the job store.
    pub async fn shutdown(self) {
        log::info!("Shutting down analysis service...");

        self.pool.shutdown();
        self.pool.wait().await;

        self.reaper.stop();
        if let Err(e) = self.reaper_handle.await {
            log::error!("Reaper task ended abnormally: {}", e);
        }

        self.store.close();
        log::info!("Analysis service stopped");
    }
}
