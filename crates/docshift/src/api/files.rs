//! File catalogue: listing, lookup, tags and processing logs.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::file_repo::{self, FileFilter, FileRow, FileSort, Page, SortOrder};
use crate::db::log_repo::{self, ProcessingLogRow};
use crate::db::FileType;

use super::envelope::Success;
use super::error::ApiError;
use super::history::{parse_positive, MAX_PAGE_SIZE};
use super::AppState;

const MAX_TAG_LEN: usize = 64;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_files))
        .route("/{file_id}", get(get_file))
        .route("/{file_id}/tags", post(add_tag))
        .route("/{file_id}/tags/{tag}", delete(remove_tag))
        .route("/{file_id}/logs", get(file_logs))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub processed: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

impl FileQuery {
    fn to_filter(&self) -> Result<FileFilter, ApiError> {
        let mut filter = FileFilter::default();

        if let Some(raw) = non_empty(&self.file_type) {
            filter.file_type = Some(
                FileType::parse(&raw.to_ascii_uppercase())
                    .ok_or_else(|| ApiError::validation(format!("Invalid file type '{}'", raw)))?,
            );
        }
        if let Some(raw) = non_empty(&self.processed) {
            filter.processed = Some(match raw {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(ApiError::validation(format!(
                        "'processed' must be true or false, got '{}'",
                        raw
                    )))
                }
            });
        }
        if let Some(page) = parse_positive("page", self.page.as_deref())? {
            filter.page = page;
        }
        if let Some(limit) = parse_positive("limit", self.limit.as_deref())? {
            filter.limit = limit.min(MAX_PAGE_SIZE);
        }
        if let Some(raw) = non_empty(&self.sort_by) {
            filter.sort = FileSort::parse(raw).ok_or_else(|| {
                ApiError::validation(format!(
                    "Invalid sortBy '{}'. Allowed: uploadedAt, originalName, size",
                    raw
                ))
            })?;
        }
        if let Some(raw) = non_empty(&self.order) {
            filter.order = SortOrder::parse(raw)
                .ok_or_else(|| ApiError::validation(format!("Invalid order '{}'", raw)))?;
        }

        Ok(filter)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub async fn list_files(
    State(state): State<AppState>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Success<Page<FileRow>>, ApiError> {
    let Query(query) = query?;
    let filter = query.to_filter()?;
    let page = file_repo::list(&state.db, &filter)?;
    Ok(Success::ok("Files retrieved successfully", page))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Success<FileRow>, ApiError> {
    let file = file_repo::find_by_id(&state.db, &file_id)?;
    Ok(Success::ok("File retrieved successfully", file))
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub tag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTags {
    file_id: String,
    tags: Vec<String>,
}

fn normalize_tag(tag: &str) -> Result<String, ApiError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(ApiError::validation("Tag must not be empty"));
    }
    if tag.chars().count() > MAX_TAG_LEN {
        return Err(ApiError::validation(format!(
            "Tag must be at most {} characters",
            MAX_TAG_LEN
        )));
    }
    Ok(tag.to_string())
}

pub async fn add_tag(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    body: Result<Json<TagRequest>, JsonRejection>,
) -> Result<Success<FileTags>, ApiError> {
    let Json(body) = body?;
    let tag = normalize_tag(&body.tag)?;
    let tags = file_repo::add_tag(&state.db, &file_id, &tag)?;
    Ok(Success::created(
        "Tag added successfully",
        FileTags { file_id, tags },
    ))
}

pub async fn remove_tag(
    State(state): State<AppState>,
    Path((file_id, tag)): Path<(String, String)>,
) -> Result<Success<FileTags>, ApiError> {
    let tags = file_repo::remove_tag(&state.db, &file_id, &tag)?;
    Ok(Success::ok(
        "Tag removed successfully",
        FileTags { file_id, tags },
    ))
}

pub async fn file_logs(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Success<Vec<ProcessingLogRow>>, ApiError> {
    // 404 for unknown files rather than an empty list.
    file_repo::find_by_id(&state.db, &file_id)?;
    let logs = log_repo::list_for_file(&state.db, &file_id)?;
    Ok(Success::ok("Processing logs retrieved successfully", logs))
}
