use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum FileAiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Failures of the analysis job pipeline.
///
/// Only `Enqueue` ever reaches the producer's caller. Everything else is
/// raised and handled inside a worker.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to enqueue analysis job: {0}")]
    Enqueue(String),

    #[error("{0}")]
    Analysis(#[from] AnalysisError),

    #[error("Analysis timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Job {job_id} stalled (exceeded stall timeout)")]
    Stalled { job_id: String },

    #[error("File {file_id} no longer exists")]
    ReferenceGone { file_id: String },

    #[error("Job store error: {0}")]
    Database(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, FileAiError>;
