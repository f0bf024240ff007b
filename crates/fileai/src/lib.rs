pub mod analysis;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod logging;
pub mod queue;
pub mod service;

pub use analysis::{AnalysisError, AnalysisResult, Analyzer, KeywordAnalyzer, MimeRouter};
pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, FileAiError, QueueError, Result};
pub use files::{FileRecord, FileRecordStore, FileUpdate, NewFile, SqliteFileStore};
pub use queue::{
    EnqueueOptions, FileRef, Job, JobHandle, JobState, JobStore, Producer, QueueConfig,
    QueueStats, RetryPolicy,
};
pub use service::{AnalysisService, UploadReceipt};
