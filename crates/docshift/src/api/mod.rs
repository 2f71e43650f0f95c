//! HTTP surface: router, shared state and the handlers for each family.

pub mod converter;
pub mod envelope;
pub mod error;
pub mod excel;
pub mod files;
pub mod health;
pub mod history;
pub mod lifecycle;
pub mod pdf;

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::file_repo::{self, FileRow};
use crate::db::Database;
use crate::sanitize::redact_path;
use crate::storage::{Family, FileStorage};

pub use error::{ApiError, ErrorKind};

/// Multipart framing overhead allowed on top of the file payloads.
const FORM_OVERHEAD: u64 = 1024 * 1024;

/// Everything a handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: FileStorage,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Database, storage: FileStorage, config: Config) -> Self {
        Self {
            db,
            storage,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let limits = &state.config.limits;
    let largest_file = limits
        .pdf_max_bytes
        .max(limits.spreadsheet_max_bytes)
        .max(limits.document_max_bytes);
    let body_limit = largest_file
        .saturating_mul(limits.merge_max_files.max(1) as u64)
        .saturating_add(FORM_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let cors = if state.config.server.cors_permissive {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/excel", excel::routes())
        .nest("/api/converter", converter::routes())
        .nest("/api/pdf", pdf::routes())
        .nest("/api/files", files::routes())
        .fallback(error::route_not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            error::attach_stack,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Streams a catalogued file back as an attachment.
pub(crate) async fn download(db: &Database, file_id: &str) -> Result<Response, ApiError> {
    let file = file_repo::find_by_id(db, file_id)?;
    let bytes = match tokio::fs::read(&file.path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found on disk"));
        }
        Err(e) => {
            return Err(ApiError::internal(format!(
                "Failed to read {}: {}",
                redact_path(std::path::Path::new(&file.path)),
                e
            )))
        }
    };

    tracing::debug!(file_id = %file.id, size = bytes.len(), "Serving download");
    attachment(&file, bytes)
}

fn attachment(file: &FileRow, bytes: Vec<u8>) -> Result<Response, ApiError> {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.original_name.replace(['"', '\\', '\r', '\n'], "_")
    );
    Response::builder()
        .header(header::CONTENT_TYPE, file.mime_type.as_str())
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition)
                .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
        )
        .body(Body::from(bytes))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// Download link for a stored file under its family's routes.
pub(crate) fn download_url(family: Family, file_id: &str) -> String {
    match family {
        Family::Excel => format!("/api/excel/{}/download", file_id),
        Family::Pdf | Family::Converter => {
            format!("/api/{}/download/{}", family.dir_name(), file_id)
        }
    }
}

/// User-facing name for an output derived from `original`, e.g.
/// `report.pdf` -> `report_compressed.pdf`.
pub(crate) fn derived_name(original: &str, suffix: &str, extension: &str) -> String {
    let file_name = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let stem = std::path::Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("file");
    format!("{}{}.{}", stem, suffix, extension)
}
