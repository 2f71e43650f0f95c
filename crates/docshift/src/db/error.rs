//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// A UNIQUE or PRIMARY KEY constraint rejected the write.
    #[error("Duplicate entry: {0}")]
    UniqueViolation(String),

    /// A FOREIGN KEY constraint rejected the write.
    #[error("Foreign key constraint failed: {0}")]
    ForeignKeyViolation(String),

    /// A lookup by identifier found no row.
    #[error("{resource} with identifier '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    /// A status change that would re-open or re-terminate a record.
    #[error("{resource} '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        resource: &'static str,
        id: String,
        from: String,
        to: String,
    },

    /// A JSON column could not be encoded or decoded.
    #[error("Invalid JSON column value: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        DatabaseError::NotFound {
            resource,
            id: id.into(),
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
            let detail = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return DatabaseError::UniqueViolation(detail);
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return DatabaseError::ForeignKeyViolation(detail);
                }
                _ => {}
            }
        }

        DatabaseError::Sqlite(err)
    }
}
