//! File repository: CRUD for the `files` and `file_tags` tables.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::types::FileType;
use super::{now_timestamp, Database, DatabaseError};

const RESOURCE: &str = "File";

/// A stored artifact, with its tags.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRow {
    pub id: String,
    pub original_name: String,
    pub stored_name: String,
    #[serde(skip)]
    pub path: String,
    pub file_type: FileType,
    pub size: i64,
    pub mime_type: String,
    pub uploaded_at: String,
    pub updated_at: String,
    pub processed: bool,
    pub metadata: serde_json::Value,
    pub tags: Vec<String>,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let metadata: Option<String> = row.get("metadata")?;
        let metadata = match metadata {
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
            original_name: row.get("original_name")?,
            stored_name: row.get("stored_name")?,
            path: row.get("path")?,
            file_type: row.get("file_type")?,
            size: row.get("size")?,
            mime_type: row.get("mime_type")?,
            uploaded_at: row.get("uploaded_at")?,
            updated_at: row.get("updated_at")?,
            processed: row.get("processed")?,
            metadata,
            tags: Vec::new(),
        })
    }
}

/// Values for a new file row. Id and timestamps are generated.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub original_name: String,
    pub stored_name: String,
    pub path: String,
    pub file_type: FileType,
    pub size: i64,
    pub mime_type: String,
    pub processed: bool,
    pub metadata: serde_json::Value,
}

/// Sortable columns for file listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileSort {
    #[default]
    UploadedAt,
    OriginalName,
    Size,
}

impl FileSort {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploadedAt" => Some(FileSort::UploadedAt),
            "originalName" => Some(FileSort::OriginalName),
            "size" => Some(FileSort::Size),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            FileSort::UploadedAt => "uploaded_at",
            FileSort::OriginalName => "original_name",
            FileSort::Size => "size",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub(crate) fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Query filter parameters for file listing.
#[derive(Debug, Clone)]
pub struct FileFilter {
    pub file_type: Option<FileType>,
    pub processed: Option<bool>,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    pub sort: FileSort,
    pub order: SortOrder,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            file_type: None,
            processed: None,
            page: 1,
            limit: 20,
            sort: FileSort::default(),
            order: SortOrder::default(),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub(crate) fn new(data: Vec<T>, total: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total.div_ceil(u64::from(limit))
        };
        Self {
            data,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

/// Inserts a new file row and returns it.
pub fn insert(db: &Database, file: &NewFile) -> Result<FileRow, DatabaseError> {
    db.with_conn(|conn| insert_on(conn, file))
}

pub(crate) fn insert_on(conn: &Connection, file: &NewFile) -> Result<FileRow, DatabaseError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_timestamp();
    let metadata = if file.metadata.is_null() {
        None
    } else {
        Some(serde_json::to_string(&file.metadata)?)
    };

    conn.execute(
        "INSERT INTO files (id, original_name, stored_name, path, file_type, size, mime_type,
         uploaded_at, updated_at, processed, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9, ?10)",
        params![
            id,
            file.original_name,
            file.stored_name,
            file.path,
            file.file_type,
            file.size,
            file.mime_type,
            now,
            file.processed,
            metadata,
        ],
    )?;

    fetch(conn, &id)?.ok_or_else(|| DatabaseError::not_found(RESOURCE, id))
}

/// Finds a file by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<FileRow, DatabaseError> {
    db.with_conn(|conn| fetch(conn, id)?.ok_or_else(|| DatabaseError::not_found(RESOURCE, id)))
}

/// Finds a file by its unique stored name.
pub fn find_by_stored_name(db: &Database, stored_name: &str) -> Result<FileRow, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM files WHERE stored_name = ?1",
                params![stored_name],
                FileRow::from_row,
            )
            .optional()?;
        match row {
            Some(mut row) => {
                row.tags = tags_on(conn, &row.id)?;
                Ok(row)
            }
            None => Err(DatabaseError::not_found(RESOURCE, stored_name)),
        }
    })
}

pub(crate) fn fetch(conn: &Connection, id: &str) -> Result<Option<FileRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM files WHERE id = ?1",
            params![id],
            FileRow::from_row,
        )
        .optional()?;
    match row {
        Some(mut row) => {
            row.tags = tags_on(conn, &row.id)?;
            Ok(Some(row))
        }
        None => Ok(None),
    }
}

/// Lists files matching the filter, one page at a time.
pub fn list(db: &Database, filter: &FileFilter) -> Result<Page<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(file_type) = filter.file_type {
            conditions.push(format!("file_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(file_type));
        }
        if let Some(processed) = filter.processed {
            conditions.push(format!("processed = ?{}", param_values.len() + 1));
            param_values.push(Box::new(processed));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM files {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let page = filter.page.max(1);
        let limit = filter.limit.max(1);
        let offset = i64::from(page - 1) * i64::from(limit);
        param_values.push(Box::new(i64::from(limit)));
        param_values.push(Box::new(offset));
        // Column and direction come from closed enums, never from input text.
        let query_sql = format!(
            "SELECT * FROM files {} ORDER BY {} {}, id ASC LIMIT ?{} OFFSET ?{}",
            where_clause,
            filter.sort.column(),
            filter.order.keyword(),
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let mut rows: Vec<FileRow> = stmt
            .query_map(params_ref.as_slice(), FileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        for row in &mut rows {
            row.tags = tags_on(conn, &row.id)?;
        }

        Ok(Page::new(rows, total, page, limit))
    })
}

/// Deletes a file row (tags, logs and referencing operations cascade).
/// Returns the deleted row so callers can remove the file from disk.
pub fn delete(db: &Database, id: &str) -> Result<FileRow, DatabaseError> {
    db.with_conn(|conn| delete_on(conn, id)?.ok_or_else(|| DatabaseError::not_found(RESOURCE, id)))
}

pub(crate) fn delete_on(conn: &Connection, id: &str) -> Result<Option<FileRow>, DatabaseError> {
    let Some(row) = fetch(conn, id)? else {
        return Ok(None);
    };
    conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
    Ok(Some(row))
}

/// Adds a tag. A repeated (file, tag) pair is a `UniqueViolation`.
pub fn add_tag(db: &Database, id: &str, tag: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        if fetch(conn, id)?.is_none() {
            return Err(DatabaseError::not_found(RESOURCE, id));
        }
        conn.execute(
            "INSERT INTO file_tags (file_id, tag, created_at) VALUES (?1, ?2, ?3)",
            params![id, tag, now_timestamp()],
        )?;
        tags_on(conn, id)
    })
}

/// Removes a tag from a file.
pub fn remove_tag(db: &Database, id: &str, tag: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM file_tags WHERE file_id = ?1 AND tag = ?2",
            params![id, tag],
        )?;
        if changed == 0 {
            return Err(DatabaseError::not_found("Tag", format!("{}:{}", id, tag)));
        }
        tags_on(conn, id)
    })
}

fn tags_on(conn: &Connection, id: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT tag FROM file_tags WHERE file_id = ?1 ORDER BY tag")?;
    let tags = stmt
        .query_map(params![id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}
