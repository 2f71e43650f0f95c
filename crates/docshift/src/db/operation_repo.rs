//! Operation repository: status-tracked rows in `conversions` and
//! `pdf_operations`.
//!
//! Both tables share a shape; `OperationFamily` picks the table. Rows are
//! created as `PROCESSING` and moved to a terminal status exactly once.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::file_repo::{self, FileRow, Page};
use super::types::{OperationFamily, OperationKind, OperationStatus};
use super::{now_timestamp, Database, DatabaseError};

/// Options key listing every output file of a multi-output operation.
pub const OUTPUT_FILE_IDS: &str = "outputFileIds";

/// One tracked invocation of a document action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRow {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub source_file_id: Option<String>,
    pub output_file_id: Option<String>,
    pub status: OperationStatus,
    pub options: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl OperationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let options: Option<String> = row.get("options")?;
        let options = match options {
            Some(text) => serde_json::from_str(&text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            None => serde_json::Value::Null,
        };

        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            source_file_id: row.get("source_file_id")?,
            output_file_id: row.get("output_file_id")?,
            status: row.get("status")?,
            options,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    /// Every file id this record references: source, output and any
    /// additional outputs listed in its options.
    pub fn referenced_file_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let extra = self
            .options
            .get(OUTPUT_FILE_IDS)
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_string));

        for id in self
            .source_file_id
            .iter()
            .chain(self.output_file_id.iter())
            .cloned()
            .chain(extra)
        {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

/// Query filter parameters for operation history.
#[derive(Debug, Clone)]
pub struct OperationFilter {
    pub status: Option<OperationStatus>,
    pub page: u32,
    pub limit: u32,
}

impl Default for OperationFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: 20,
        }
    }
}

fn select_sql(family: OperationFamily) -> String {
    format!(
        "SELECT id, {kind} AS kind, source_file_id, output_file_id, status, options,
         error_message, created_at, updated_at, completed_at FROM {table}",
        kind = family.kind_column(),
        table = family.table()
    )
}

fn encode_options(options: &serde_json::Value) -> Result<Option<String>, DatabaseError> {
    if options.is_null() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(options)?))
    }
}

/// Creates a record in `PROCESSING` state.
pub fn create(
    db: &Database,
    kind: OperationKind,
    source_file_id: Option<&str>,
    options: &serde_json::Value,
) -> Result<OperationRow, DatabaseError> {
    let family = kind.family();
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_timestamp();
    let options = encode_options(options)?;

    db.with_conn(|conn| {
        conn.execute(
            &format!(
                "INSERT INTO {} (id, {}, source_file_id, status, options, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                family.table(),
                family.kind_column()
            ),
            params![
                id,
                kind,
                source_file_id,
                OperationStatus::Processing,
                options,
                now
            ],
        )?;
        fetch(conn, family, &id)?.ok_or_else(|| DatabaseError::not_found(family.resource(), id))
    })
}

/// Marks a `PROCESSING` record `COMPLETED`, recording its output and
/// result-derived options.
pub fn complete(
    db: &Database,
    family: OperationFamily,
    id: &str,
    output_file_id: Option<&str>,
    options: &serde_json::Value,
) -> Result<OperationRow, DatabaseError> {
    let options = encode_options(options)?;
    db.with_conn(|conn| {
        let now = now_timestamp();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = ?2, output_file_id = ?3, options = ?4,
                 updated_at = ?5, completed_at = ?5
                 WHERE id = ?1 AND status = ?6",
                family.table()
            ),
            params![
                id,
                OperationStatus::Completed,
                output_file_id,
                options,
                now,
                OperationStatus::Processing
            ],
        )?;
        finish_transition(conn, family, id, changed, OperationStatus::Completed)
    })
}

/// Marks a `PROCESSING` record `FAILED` with the error message.
pub fn fail(
    db: &Database,
    family: OperationFamily,
    id: &str,
    message: &str,
) -> Result<OperationRow, DatabaseError> {
    db.with_conn(|conn| {
        let now = now_timestamp();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = ?2, error_message = ?3, updated_at = ?4, completed_at = ?4
                 WHERE id = ?1 AND status = ?5",
                family.table()
            ),
            params![
                id,
                OperationStatus::Failed,
                message,
                now,
                OperationStatus::Processing
            ],
        )?;
        finish_transition(conn, family, id, changed, OperationStatus::Failed)
    })
}

fn finish_transition(
    conn: &Connection,
    family: OperationFamily,
    id: &str,
    changed: usize,
    to: OperationStatus,
) -> Result<OperationRow, DatabaseError> {
    let row = fetch(conn, family, id)?
        .ok_or_else(|| DatabaseError::not_found(family.resource(), id))?;
    if changed == 0 {
        return Err(DatabaseError::InvalidTransition {
            resource: family.resource(),
            id: id.to_string(),
            from: row.status.to_string(),
            to: to.to_string(),
        });
    }
    Ok(row)
}

/// Finds a record by its ID.
pub fn find_by_id(
    db: &Database,
    family: OperationFamily,
    id: &str,
) -> Result<OperationRow, DatabaseError> {
    db.with_conn(|conn| {
        fetch(conn, family, id)?.ok_or_else(|| DatabaseError::not_found(family.resource(), id))
    })
}

fn fetch(
    conn: &Connection,
    family: OperationFamily,
    id: &str,
) -> Result<Option<OperationRow>, DatabaseError> {
    let sql = format!("{} WHERE id = ?1", select_sql(family));
    Ok(conn
        .query_row(&sql, params![id], OperationRow::from_row)
        .optional()?)
}

/// Lists records newest first.
pub fn list(
    db: &Database,
    family: OperationFamily,
    filter: &OperationFilter,
) -> Result<Page<OperationRow>, DatabaseError> {
    db.with_conn(|conn| {
        let page = filter.page.max(1);
        let limit = filter.limit.max(1);
        let offset = i64::from(page - 1) * i64::from(limit);

        let (where_clause, status) = match filter.status {
            Some(status) => ("WHERE status = ?1", Some(status)),
            None => ("WHERE ?1 IS NULL", None),
        };

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} {}", family.table(), where_clause),
            params![status],
            |r| r.get(0),
        )?;

        let sql = format!(
            "{} {} ORDER BY created_at DESC, id ASC LIMIT ?2 OFFSET ?3",
            select_sql(family),
            where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status, i64::from(limit), offset], OperationRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(rows, total, page, limit))
    })
}

/// Deletes a record together with every file row it references, in one
/// transaction. Returns the removed file rows so callers can delete the
/// files on disk.
pub fn delete(
    db: &Database,
    family: OperationFamily,
    id: &str,
) -> Result<Vec<FileRow>, DatabaseError> {
    db.with_tx(|tx| {
        let row = fetch(tx, family, id)?
            .ok_or_else(|| DatabaseError::not_found(family.resource(), id))?;

        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", family.table()),
            params![id],
        )?;

        let mut removed = Vec::new();
        for file_id in row.referenced_file_ids() {
            if let Some(file) = file_repo::delete_on(tx, &file_id)? {
                removed.push(file);
            }
        }
        Ok(removed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::file_repo::NewFile;
    use crate::db::types::FileType;
    use serde_json::json;

    fn add_file(db: &Database, name: &str) -> FileRow {
        file_repo::insert(
            db,
            &NewFile {
                original_name: name.to_string(),
                stored_name: format!("{}-{}", uuid::Uuid::new_v4(), name),
                path: format!("/tmp/{}", name),
                file_type: FileType::Pdf,
                size: 1,
                mime_type: "application/pdf".to_string(),
                processed: false,
                metadata: serde_json::Value::Null,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_starts_processing() {
        let db = Database::open_in_memory().unwrap();
        let source = add_file(&db, "in.pdf");
        let op = create(
            &db,
            OperationKind::Compress,
            Some(&source.id),
            &json!({ "level": "low" }),
        )
        .unwrap();
        assert_eq!(op.status, OperationStatus::Processing);
        assert_eq!(op.kind, OperationKind::Compress);
        assert_eq!(op.options["level"], "low");
        assert!(op.completed_at.is_none());
    }

    #[test]
    fn test_complete_once() {
        let db = Database::open_in_memory().unwrap();
        let output = add_file(&db, "out.xlsx");
        let op = create(&db, OperationKind::JsonToExcel, None, &json!({})).unwrap();

        let done = complete(
            &db,
            OperationFamily::Conversion,
            &op.id,
            Some(&output.id),
            &json!({ "rows": 3 }),
        )
        .unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert_eq!(done.output_file_id.as_deref(), Some(output.id.as_str()));
        assert!(done.completed_at.is_some());

        let err = fail(&db, OperationFamily::Conversion, &op.id, "late failure").unwrap_err();
        match err {
            DatabaseError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, "COMPLETED");
                assert_eq!(to, "FAILED");
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        assert!(matches!(
            complete(&db, OperationFamily::Conversion, &op.id, None, &json!({ "rows": 0 })),
            Err(DatabaseError::InvalidTransition { .. })
        ));
        let row = find_by_id(&db, OperationFamily::Conversion, &op.id).unwrap();
        assert_eq!(row.status, OperationStatus::Completed);
        assert_eq!(row.output_file_id.as_deref(), Some(output.id.as_str()));
        assert_eq!(row.options["rows"], 3);
        assert!(row.error_message.is_none());
    }

    #[test]
    fn test_fail_records_message() {
        let db = Database::open_in_memory().unwrap();
        let op = create(&db, OperationKind::Merge, None, &serde_json::Value::Null).unwrap();
        let failed = fail(&db, OperationFamily::PdfOperation, &op.id, "bad pdf").unwrap();
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("bad pdf"));

        assert!(complete(&db, OperationFamily::PdfOperation, &op.id, None, &json!({})).is_err());
    }

    #[test]
    fn test_families_are_separate_tables() {
        let db = Database::open_in_memory().unwrap();
        let op = create(&db, OperationKind::Merge, None, &json!({})).unwrap();
        assert!(matches!(
            find_by_id(&db, OperationFamily::Conversion, &op.id),
            Err(DatabaseError::NotFound { resource: "Conversion", .. })
        ));
        assert!(find_by_id(&db, OperationFamily::PdfOperation, &op.id).is_ok());
    }

    #[test]
    fn test_transition_on_missing_row_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            fail(&db, OperationFamily::PdfOperation, "missing", "x"),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_by_status() {
        let db = Database::open_in_memory().unwrap();
        let a = create(&db, OperationKind::Merge, None, &json!({})).unwrap();
        create(&db, OperationKind::Compress, None, &json!({})).unwrap();
        complete(&db, OperationFamily::PdfOperation, &a.id, None, &json!({})).unwrap();

        let all = list(&db, OperationFamily::PdfOperation, &OperationFilter::default()).unwrap();
        assert_eq!(all.total, 2);

        let completed = list(
            &db,
            OperationFamily::PdfOperation,
            &OperationFilter {
                status: Some(OperationStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(completed.total, 1);
        assert_eq!(completed.data[0].id, a.id);

        let conversions =
            list(&db, OperationFamily::Conversion, &OperationFilter::default()).unwrap();
        assert_eq!(conversions.total, 0);
    }

    #[test]
    fn test_delete_removes_referenced_files() {
        let db = Database::open_in_memory().unwrap();
        let source = add_file(&db, "in.pdf");
        let first = add_file(&db, "page_001.pdf");
        let second = add_file(&db, "page_002.pdf");
        let unrelated = add_file(&db, "other.pdf");

        let op = create(&db, OperationKind::SplitPages, Some(&source.id), &json!({})).unwrap();
        complete(
            &db,
            OperationFamily::PdfOperation,
            &op.id,
            Some(&first.id),
            &json!({ OUTPUT_FILE_IDS: [first.id.clone(), second.id.clone()] }),
        )
        .unwrap();

        let removed = delete(&db, OperationFamily::PdfOperation, &op.id).unwrap();
        let mut names: Vec<_> = removed.iter().map(|f| f.original_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["in.pdf", "page_001.pdf", "page_002.pdf"]);

        assert!(find_by_id(&db, OperationFamily::PdfOperation, &op.id).is_err());
        assert!(file_repo::find_by_id(&db, &source.id).is_err());
        assert!(file_repo::find_by_id(&db, &unrelated.id).is_ok());
    }

    #[test]
    fn test_referenced_file_ids_deduplicates() {
        let db = Database::open_in_memory().unwrap();
        let out = add_file(&db, "out.pdf");
        let op = create(&db, OperationKind::ExtractPages, None, &json!({})).unwrap();
        let done = complete(
            &db,
            OperationFamily::PdfOperation,
            &op.id,
            Some(&out.id),
            &json!({ OUTPUT_FILE_IDS: [out.id.clone()] }),
        )
        .unwrap();
        assert_eq!(done.referenced_file_ids(), vec![out.id]);
    }
}
