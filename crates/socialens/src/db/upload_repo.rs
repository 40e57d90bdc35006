//! Upload repository: CRUD operations for the `uploads` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw upload row. `errors` is a JSON array of error entries.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRow {
    pub id: String,
    pub filename: String,
    pub total_posts: u64,
    pub persisted_posts: u64,
    pub skipped_records: u64,
    pub failed_posts: u64,
    pub status: String,
    pub errors: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl UploadRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            total_posts: row.get("total_posts")?,
            persisted_posts: row.get("persisted_posts")?,
            skipped_records: row.get("skipped_records")?,
            failed_posts: row.get("failed_posts")?,
            status: row.get("status")?,
            errors: row.get("errors")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Inserts a new upload row.
pub fn insert(db: &Database, upload: &UploadRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO uploads (id, filename, total_posts, persisted_posts, skipped_records,
             failed_posts, status, errors, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                upload.id,
                upload.filename,
                upload.total_posts,
                upload.persisted_posts,
                upload.skipped_records,
                upload.failed_posts,
                upload.status,
                upload.errors,
                upload.created_at,
                upload.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds an upload by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<UploadRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM uploads WHERE id = ?1",
                params![id],
                UploadRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Updates only the status of an upload. Returns `false` if no row matched.
pub fn update_status(db: &Database, id: &str, status: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE uploads SET status = ?2 WHERE id = ?1",
            params![id, status],
        )?;
        Ok(changed == 1)
    })
}

/// Records the parse/persist tallies.
pub fn update_counts(
    db: &Database,
    id: &str,
    total_posts: u64,
    persisted_posts: u64,
    skipped_records: u64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE uploads SET total_posts = ?2, persisted_posts = ?3, skipped_records = ?4
             WHERE id = ?1",
            params![id, total_posts, persisted_posts, skipped_records],
        )?;
        Ok(changed == 1)
    })
}

/// Moves an upload to a finished status and stamps `completed_at`.
pub fn finish(
    db: &Database,
    id: &str,
    status: &str,
    failed_posts: u64,
    completed_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE uploads SET status = ?2, failed_posts = ?3, completed_at = ?4 WHERE id = ?1",
            params![id, status, failed_posts, completed_at],
        )?;
        Ok(changed == 1)
    })
}

/// Appends one JSON-encoded entry to the `errors` array.
///
/// The read and the write happen under the same connection lock, so
/// concurrent appends never lose entries.
pub fn append_error(db: &Database, id: &str, entry: &serde_json::Value) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let current: Option<String> = conn
            .query_row(
                "SELECT errors FROM uploads WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };

        let mut errors: Vec<serde_json::Value> = serde_json::from_str(&current)?;
        errors.push(entry.clone());
        conn.execute(
            "UPDATE uploads SET errors = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(&errors)?],
        )?;
        Ok(true)
    })
}

/// Lists uploads with the given status, oldest first.
pub fn list_by_status(db: &Database, status: &str) -> Result<Vec<UploadRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM uploads WHERE status = ?1 ORDER BY created_at ASC, id ASC")?;
        let rows = stmt
            .query_map(params![status], UploadRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
