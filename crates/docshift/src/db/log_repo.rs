//! Processing log repository: append-only audit entries per file.

use rusqlite::{params, Row};
use serde::Serialize;

use super::types::{OperationKind, OperationStatus};
use super::{now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLogRow {
    pub id: i64,
    pub file_id: String,
    pub operation: OperationKind,
    pub status: OperationStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub details: Option<String>,
}

impl ProcessingLogRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_id: row.get("file_id")?,
            operation: row.get("operation")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            details: row.get("details")?,
        })
    }
}

/// Opens a log entry in `PROCESSING` state. Returns its id.
pub fn start(db: &Database, file_id: &str, operation: OperationKind) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO processing_logs (file_id, operation, status, started_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![file_id, operation, OperationStatus::Processing, now_timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Closes an open entry. An entry is closed at most once.
pub fn finish(
    db: &Database,
    id: i64,
    status: OperationStatus,
    details: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processing_logs SET status = ?2, finished_at = ?3, details = ?4
             WHERE id = ?1 AND finished_at IS NULL",
            params![id, status, now_timestamp(), details],
        )?;
        if changed == 0 {
            return Err(DatabaseError::not_found("Open processing log", id.to_string()));
        }
        Ok(())
    })
}

/// All entries for a file, oldest first.
pub fn list_for_file(db: &Database, file_id: &str) -> Result<Vec<ProcessingLogRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_logs WHERE file_id = ?1 ORDER BY started_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![file_id], ProcessingLogRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
