//! File repository: CRUD operations for the `files` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{from_millis, to_millis, Database, DatabaseError};
use crate::files::{FileRecord, FileUpdate};

struct FileRow {
    id: String,
    filename: String,
    original_name: String,
    path: String,
    mime_type: String,
    size: u64,
    uploaded_at: i64,
    ai_tags: String,
    summary: String,
    analyzed: bool,
    analysis_date: Option<i64>,
    analysis_error: Option<String>,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            original_name: row.get("original_name")?,
            path: row.get("path")?,
            mime_type: row.get("mime_type")?,
            size: row.get("size")?,
            uploaded_at: row.get("uploaded_at")?,
            ai_tags: row.get("ai_tags")?,
            summary: row.get("summary")?,
            analyzed: row.get("analyzed")?,
            analysis_date: row.get("analysis_date")?,
            analysis_error: row.get("analysis_error")?,
        })
    }

    fn into_record(self) -> Result<FileRecord, DatabaseError> {
        let ai_tags: Vec<String> =
            serde_json::from_str(&self.ai_tags).map_err(|e| DatabaseError::Corrupt {
                table: "files",
                reason: format!("ai_tags for {}: {}", self.id, e),
            })?;
        let analysis_date = match self.analysis_date {
            Some(ms) => Some(from_millis(ms, "files")?),
            None => None,
        };

        Ok(FileRecord {
            uploaded_at: from_millis(self.uploaded_at, "files")?,
            id: self.id,
            filename: self.filename,
            original_name: self.original_name,
            path: self.path,
            mime_type: self.mime_type,
            size: self.size,
            ai_tags,
            summary: self.summary,
            analyzed: self.analyzed,
            analysis_date,
            analysis_error: self.analysis_error,
        })
    }
}

fn encode_tags(tags: &[String]) -> String {
    // Serializing a slice of strings cannot fail.
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Inserts a new file record.
pub fn insert(db: &Database, file: &FileRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO files (id, filename, original_name, path, mime_type, size, uploaded_at,
             ai_tags, summary, analyzed, analysis_date, analysis_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                file.id,
                file.filename,
                file.original_name,
                file.path,
                file.mime_type,
                file.size,
                to_millis(file.uploaded_at),
                encode_tags(&file.ai_tags),
                file.summary,
                file.analyzed,
                file.analysis_date.map(to_millis),
                file.analysis_error,
            ],
        )?;
        Ok(())
    })
}

/// Finds a file record by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM files WHERE id = ?1",
                params![id],
                FileRow::from_row,
            )
            .optional()?)
    })?;
    row.map(FileRow::into_record).transpose()
}

/// Applies a partial analysis update. Returns `false` when no row matched.
pub fn update(db: &Database, id: &str, update: &FileUpdate) -> Result<bool, DatabaseError> {
    let tags = update.ai_tags.as_deref().map(encode_tags);
    let (set_date, date) = match update.analysis_date {
        Some(date) => (true, date.map(to_millis)),
        None => (false, None),
    };
    let (set_error, error) = match &update.analysis_error {
        Some(error) => (true, error.clone()),
        None => (false, None),
    };

    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE files SET
                analyzed = COALESCE(?2, analyzed),
                ai_tags = COALESCE(?3, ai_tags),
                summary = COALESCE(?4, summary),
                analysis_date = CASE WHEN ?5 THEN ?6 ELSE analysis_date END,
                analysis_error = CASE WHEN ?7 THEN ?8 ELSE analysis_error END
             WHERE id = ?1",
            params![
                id,
                update.analyzed,
                tags,
                update.summary,
                set_date,
                date,
                set_error,
                error,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Deletes a file record. Returns `false` when no row matched.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    })
}
