//! File record store.
//!
//! The queue never owns file records; it reads them to resolve the content
//! to analyze and writes the analysis projection back when a job finishes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{blocking, file_repo, Database, DatabaseError};

/// A stored file with its analysis projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    /// Name the file is stored under.
    pub filename: String,
    /// Name the file was uploaded with.
    pub original_name: String,
    pub path: String,
    pub mime_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub ai_tags: Vec<String>,
    pub summary: String,
    pub analyzed: bool,
    pub analysis_date: Option<DateTime<Utc>>,
    pub analysis_error: Option<String>,
}

/// Fields supplied when a file record is created at upload time.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub filename: String,
    pub original_name: String,
    pub path: String,
    pub mime_type: String,
    pub size: u64,
}

/// A partial update of the analysis projection. `None` leaves a field alone.
///
/// Updates carry every value they write (including the analysis date), so
/// applying the same update twice yields the same record as applying it once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileUpdate {
    pub analyzed: Option<bool>,
    pub ai_tags: Option<Vec<String>>,
    pub summary: Option<String>,
    pub analysis_date: Option<Option<DateTime<Utc>>>,
    pub analysis_error: Option<Option<String>>,
}

impl FileUpdate {
    /// Projection written when analysis succeeds.
    pub fn analysis_succeeded(tags: Vec<String>, summary: String, at: DateTime<Utc>) -> Self {
        Self {
            analyzed: Some(true),
            ai_tags: Some(tags),
            summary: Some(summary),
            analysis_date: Some(Some(at)),
            analysis_error: Some(None),
        }
    }

    /// Projection written when an attempt fails. Tags and summary are kept.
    pub fn analysis_failed(message: &str) -> Self {
        Self {
            analyzed: Some(false),
            analysis_error: Some(Some(message.to_string())),
            ..Default::default()
        }
    }
}

/// Persistence contract for file records.
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    /// Creates a record with `analyzed = false` and returns its id.
    async fn create(&self, file: NewFile) -> Result<String, DatabaseError>;

    /// Applies a partial update. Returns `false` if the record does not exist.
    async fn update(&self, id: &str, update: &FileUpdate) -> Result<bool, DatabaseError>;

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError>;

    /// Deletes a record. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool, DatabaseError>;
}

/// File record store backed by the `files` table.
#[derive(Clone)]
pub struct SqliteFileStore {
    db: Database,
}

impl SqliteFileStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileRecordStore for SqliteFileStore {
    async fn create(&self, file: NewFile) -> Result<String, DatabaseError> {
        let record = FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            filename: file.filename,
            original_name: file.original_name,
            path: file.path,
            mime_type: file.mime_type,
            size: file.size,
            uploaded_at: Utc::now(),
            ai_tags: vec![],
            summary: String::new(),
            analyzed: false,
            analysis_date: None,
            analysis_error: None,
        };
        let db = self.db.clone();
        let record = blocking(move || file_repo::insert(&db, &record).map(|()| record)).await?;
        log::debug!("File record {} created for {}", record.id, record.original_name);
        Ok(record.id)
    }

    async fn update(&self, id: &str, update: &FileUpdate) -> Result<bool, DatabaseError> {
        let (db, id, update) = (self.db.clone(), id.to_string(), update.clone());
        blocking(move || file_repo::update(&db, &id, &update)).await
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let (db, id) = (self.db.clone(), id.to_string());
        blocking(move || file_repo::find_by_id(&db, &id)).await
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let (db, id) = (self.db.clone(), id.to_string());
        blocking(move || file_repo::delete(&db, &id)).await
    }
}
