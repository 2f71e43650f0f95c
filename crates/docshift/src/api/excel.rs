//! Spreadsheet routes: upload, read, write, create, download, info, delete.

use std::path::PathBuf;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::file_repo::{self, FileRow};
use crate::db::{FileType, OperationKind};
use crate::processor::spreadsheet::{self, SheetInput, SheetStats, WorkbookData, WriteSummary};
use crate::storage::{Family, Stage};
use crate::upload::{self, UploadProfile};

use super::envelope::Success;
use super::error::ApiError;
use super::lifecycle::{
    discard_output, register_output, register_upload, track, Completion, OperationOutput,
};
use super::{derived_name, download_url, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_file))
        .route("/create", post(create_workbook))
        .route("/{file_id}", delete(delete_file))
        .route("/{file_id}/read", get(read_workbook))
        .route("/{file_id}/write", put(write_workbook))
        .route("/{file_id}/download", get(download_file))
        .route("/{file_id}/info", get(file_info))
}

/// Sheet data in a request: one sheet or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SheetsPayload {
    Many(Vec<SheetInput>),
    One(SheetInput),
}

impl SheetsPayload {
    fn into_sheets(self) -> Vec<SheetInput> {
        match self {
            SheetsPayload::Many(sheets) => sheets,
            SheetsPayload::One(sheet) => vec![sheet],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub data: SheetsPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub data: SheetsPayload,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookContents {
    file_id: String,
    file_name: String,
    #[serde(flatten)]
    workbook: WorkbookData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    file: FileRow,
    exists: bool,
    size_on_disk: Option<u64>,
    modified_at: Option<String>,
    sheets: Vec<SheetStats>,
}

/// Looks up a file and checks it is a spreadsheet.
fn spreadsheet_file(state: &AppState, file_id: &str) -> Result<FileRow, ApiError> {
    let file = file_repo::find_by_id(&state.db, file_id)?;
    if file.file_type != FileType::Excel {
        return Err(ApiError::validation(format!(
            "File '{}' is not a spreadsheet",
            file.original_name
        )));
    }
    Ok(file)
}

pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<FileRow>, ApiError> {
    let mut multipart = multipart?;
    let profile = UploadProfile::spreadsheet(Family::Excel, &state.config.limits);
    let mut form = upload::receive(&mut multipart, &profile, &state.storage).await?;
    let staged = form.take_file(profile.field)?;

    let file = register_upload(&state.db, &staged)?;
    tracing::info!(file_id = %file.id, "Spreadsheet uploaded");
    Ok(Success::created("File uploaded successfully", file))
}

pub async fn read_workbook(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Success<WorkbookContents>, ApiError> {
    let file = spreadsheet_file(&state, &file_id)?;
    let path = PathBuf::from(&file.path);
    let workbook = tokio::task::spawn_blocking(move || spreadsheet::read(&path)).await??;

    Ok(Success::ok(
        "File read successfully",
        WorkbookContents {
            file_id: file.id,
            file_name: file.original_name,
            workbook,
        },
    ))
}

pub async fn write_workbook(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    body: Result<Json<WriteRequest>, JsonRejection>,
) -> Result<Success<OperationOutput<WriteSummary>>, ApiError> {
    let Json(body) = body?;
    let source = spreadsheet_file(&state, &file_id)?;
    let sheets = body.data.into_sheets();

    let output_name = derived_name(&source.original_name, "_modified", "xlsx");
    let reserved = state
        .storage
        .reserve(Family::Excel, Stage::Processed, &output_name, "xlsx")?;

    let input = PathBuf::from(&source.path);
    let output = reserved.path.clone();
    let options = json!({ "sheets": sheets.len() });

    let tracked = track(
        &state,
        OperationKind::ExcelWrite,
        Some(&source.id),
        options,
        move || discard_output(&output, spreadsheet::write(&input, &sheets, &output)),
        |summary: &WriteSummary| {
            let file = register_output(
                &state.db,
                &reserved.path,
                &reserved.stored_name,
                &output_name,
                json!({ "sourceFileId": source.id }),
            )?;
            let completion = Completion {
                output_file_id: Some(file.id.clone()),
                options: json!({
                    "sheetsWritten": summary.sheets_written,
                    "cellsWritten": summary.cells_written,
                }),
            };
            Ok((completion, file))
        },
    )
    .await?;

    Ok(Success::ok(
        "File written successfully",
        OperationOutput {
            operation_id: tracked.record.id,
            download_url: download_url(Family::Excel, &tracked.outputs.id),
            file: tracked.outputs,
            result: tracked.result,
        },
    ))
}

pub async fn create_workbook(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Success<OperationOutput<WriteSummary>>, ApiError> {
    let Json(body) = body?;
    let sheets = body.data.into_sheets();
    let output_name = derived_name(
        body.file_name.as_deref().unwrap_or("workbook"),
        "",
        "xlsx",
    );
    let reserved = state
        .storage
        .reserve(Family::Excel, Stage::Processed, &output_name, "xlsx")?;

    let output = reserved.path.clone();
    let options = json!({ "sheets": sheets.len(), "fileName": output_name });

    let tracked = track(
        &state,
        OperationKind::ExcelCreate,
        None,
        options,
        move || discard_output(&output, spreadsheet::create(&sheets, &output)),
        |summary: &WriteSummary| {
            let file = register_output(
                &state.db,
                &reserved.path,
                &reserved.stored_name,
                &output_name,
                json!({}),
            )?;
            let completion = Completion {
                output_file_id: Some(file.id.clone()),
                options: json!({ "cellsWritten": summary.cells_written }),
            };
            Ok((completion, file))
        },
    )
    .await?;

    Ok(Success::created(
        "Workbook created successfully",
        OperationOutput {
            operation_id: tracked.record.id,
            download_url: download_url(Family::Excel, &tracked.outputs.id),
            file: tracked.outputs,
            result: tracked.result,
        },
    ))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    spreadsheet_file(&state, &file_id)?;
    super::download(&state.db, &file_id).await
}

pub async fn file_info(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Success<FileInfo>, ApiError> {
    let file = spreadsheet_file(&state, &file_id)?;
    let path = PathBuf::from(&file.path);

    let disk = tokio::fs::metadata(&path).await.ok();
    let modified_at = disk
        .as_ref()
        .and_then(|m| m.modified().ok())
        .map(|t| {
            chrono::DateTime::<chrono::Utc>::from(t)
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        });

    let sheets = if disk.is_some() {
        tokio::task::spawn_blocking(move || spreadsheet::stats(&path)).await??
    } else {
        Vec::new()
    };

    Ok(Success::ok(
        "File info retrieved successfully",
        FileInfo {
            exists: disk.is_some(),
            size_on_disk: disk.as_ref().map(|m| m.len()),
            modified_at,
            sheets,
            file,
        },
    ))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Success<serde_json::Value>, ApiError> {
    spreadsheet_file(&state, &file_id)?;
    let file = file_repo::delete(&state.db, &file_id)?;
    state.storage.remove_quietly(&[file.path.as_str()]);
    tracing::info!(file_id = %file.id, "Spreadsheet deleted");
    Ok(Success::ok("File deleted successfully", json!({ "id": file.id })))
}
