//! Listing, lookup and deletion of operation records, shared by the PDF
//! and converter routes.

use serde::Deserialize;

use crate::db::file_repo::Page;
use crate::db::operation_repo::{self, OperationFilter, OperationRow};
use crate::db::{OperationFamily, OperationStatus};

use super::error::ApiError;
use super::AppState;

pub const MAX_PAGE_SIZE: u32 = 100;

/// Raw `?page=&limit=&status=` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl HistoryQuery {
    pub fn to_filter(&self) -> Result<OperationFilter, ApiError> {
        let mut filter = OperationFilter::default();
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            filter.status = Some(OperationStatus::parse(&status.to_ascii_uppercase()).ok_or_else(
                || ApiError::validation(format!("Invalid status '{}'", status)),
            )?);
        }
        if let Some(page) = parse_positive("page", self.page.as_deref())? {
            filter.page = page;
        }
        if let Some(limit) = parse_positive("limit", self.limit.as_deref())? {
            filter.limit = limit.min(MAX_PAGE_SIZE);
        }
        Ok(filter)
    }
}

/// Parses an optional positive integer query parameter.
pub fn parse_positive(name: &str, value: Option<&str>) -> Result<Option<u32>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(Some(n)),
            _ => Err(ApiError::validation(format!(
                "'{}' must be a positive integer, got '{}'",
                name, raw
            ))),
        },
    }
}

pub fn list(
    state: &AppState,
    family: OperationFamily,
    query: &HistoryQuery,
) -> Result<Page<OperationRow>, ApiError> {
    let filter = query.to_filter()?;
    Ok(operation_repo::list(&state.db, family, &filter)?)
}

pub fn get(state: &AppState, family: OperationFamily, id: &str) -> Result<OperationRow, ApiError> {
    Ok(operation_repo::find_by_id(&state.db, family, id)?)
}

/// Deletes the record and every file it references, rows first, then the
/// files on disk (best-effort). Returns how many files were removed.
pub fn delete(state: &AppState, family: OperationFamily, id: &str) -> Result<usize, ApiError> {
    let files = operation_repo::delete(&state.db, family, id)?;
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let removed = state.storage.remove_quietly(&paths);
    tracing::info!(
        record = id,
        files = files.len(),
        removed_from_disk = removed,
        "{} deleted",
        family.resource()
    );
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let filter = HistoryQuery::default().to_filter().unwrap();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, 20);
        assert!(filter.status.is_none());
    }

    #[test]
    fn test_query_parses_and_clamps() {
        let query = HistoryQuery {
            status: Some("failed".into()),
            page: Some("3".into()),
            limit: Some("500".into()),
        };
        let filter = query.to_filter().unwrap();
        assert_eq!(filter.status, Some(OperationStatus::Failed));
        assert_eq!(filter.page, 3);
        assert_eq!(filter.limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_query_rejects_bad_values() {
        let query = HistoryQuery {
            page: Some("0".into()),
            ..Default::default()
        };
        assert!(query.to_filter().is_err());

        let query = HistoryQuery {
            status: Some("DONE".into()),
            ..Default::default()
        };
        let err = query.to_filter().unwrap_err();
        assert_eq!(err.message, "Invalid status 'DONE'");
    }
}
