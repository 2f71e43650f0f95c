//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_files_table",
        sql: include_str!("sql/001_create_files.sql"),
    },
    Migration {
        version: 2,
        description: "create_file_tags_table",
        sql: include_str!("sql/002_create_file_tags.sql"),
    },
    Migration {
        version: 3,
        description: "create_conversions_table",
        sql: include_str!("sql/003_create_conversions.sql"),
    },
    Migration {
        version: 4,
        description: "create_pdf_operations_table",
        sql: include_str!("sql/004_create_pdf_operations.sql"),
    },
    Migration {
        version: 5,
        description: "create_processing_logs_table",
        sql: include_str!("sql/005_create_processing_logs.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    /// Checks whether a column exists on a table using `PRAGMA table_info`.
    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
        let exists = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .any(|r| r.map(|name| name == column).unwrap_or(false));
        exists
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = migrated();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = migrated();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_operation_tables_have_completed_at() {
        let conn = migrated();
        assert!(column_exists(&conn, "conversions", "completed_at"));
        assert!(column_exists(&conn, "pdf_operations", "completed_at"));
        assert!(!column_exists(&conn, "files", "completed_at"));
    }

    #[test]
    fn test_file_type_check_constraint() {
        let conn = migrated();
        let result = conn.execute(
            "INSERT INTO files (id, original_name, stored_name, path, file_type, mime_type, uploaded_at, updated_at)
             VALUES ('f1', 'a', 'a', '/a', 'SPREADSHEET', 'x', 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_deleting_file_cascades_to_tags_and_operations() {
        let conn = migrated();
        conn.execute_batch(
            "INSERT INTO files (id, original_name, stored_name, path, file_type, mime_type, uploaded_at, updated_at)
                 VALUES ('f1', 'a.pdf', 'a-1.pdf', '/a-1.pdf', 'PDF', 'application/pdf', 'now', 'now');
             INSERT INTO file_tags (file_id, tag, created_at) VALUES ('f1', 'invoice', 'now');
             INSERT INTO pdf_operations (id, operation_type, source_file_id, status, created_at, updated_at)
                 VALUES ('op1', 'COMPRESS', 'f1', 'COMPLETED', 'now', 'now');
             DELETE FROM files WHERE id = 'f1';",
        )
        .unwrap();

        let tags: u32 = conn
            .query_row("SELECT COUNT(*) FROM file_tags", [], |r| r.get(0))
            .unwrap();
        let ops: u32 = conn
            .query_row("SELECT COUNT(*) FROM pdf_operations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tags, 0);
        assert_eq!(ops, 0);
    }
}
