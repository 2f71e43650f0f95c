//! JSON ⇄ spreadsheet conversion routes and conversion history.

use std::path::PathBuf;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::file_repo::Page;
use crate::db::operation_repo::OperationRow;
use crate::db::{OperationFamily, OperationKind};
use crate::error::ProcessError;
use crate::processor::converter::{self, ExcelToJsonResult, JsonToExcelSummary};
use crate::storage::{Family, Stage};
use crate::upload::{self, UploadProfile};

use super::envelope::Success;
use super::error::ApiError;
use super::history::{self, HistoryQuery};
use super::lifecycle::{
    discard_output, register_output, register_upload, track, Completion, OperationOutput,
};
use super::{derived_name, download_url, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/json-to-excel", post(json_to_excel))
        .route("/excel-to-json", post(excel_to_json))
        .route("/download/{file_id}", get(download_file))
        .route("/conversions", get(list_conversions))
        .route(
            "/{conversion_id}",
            get(get_conversion).delete(delete_conversion),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonToExcelRequest {
    pub json_data: Value,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcelToJsonResponse {
    conversion_id: String,
    source_file_id: String,
    /// The JSON document stored alongside the response.
    file_id: String,
    download_url: String,
    #[serde(flatten)]
    result: ExcelToJsonResult,
}

pub async fn json_to_excel(
    State(state): State<AppState>,
    body: Result<Json<JsonToExcelRequest>, JsonRejection>,
) -> Result<Success<OperationOutput<JsonToExcelSummary>>, ApiError> {
    let Json(body) = body?;
    if body.json_data.is_null() {
        return Err(ApiError::validation("jsonData is required"));
    }

    let output_name = derived_name(body.file_name.as_deref().unwrap_or("converted"), "", "xlsx");
    let reserved = state
        .storage
        .reserve(Family::Converter, Stage::Converted, &output_name, "xlsx")?;

    let output = reserved.path.clone();
    let data = body.json_data;
    let options = json!({ "fileName": output_name });

    let tracked = track(
        &state,
        OperationKind::JsonToExcel,
        None,
        options,
        move || discard_output(&output, converter::json_to_excel(&data, &output)),
        |summary: &JsonToExcelSummary| {
            let file = register_output(
                &state.db,
                &reserved.path,
                &reserved.stored_name,
                &output_name,
                json!({ "sheets": summary.sheets }),
            )?;
            let rows: usize = summary.sheets.iter().map(|s| s.rows).sum();
            let completion = Completion {
                output_file_id: Some(file.id.clone()),
                options: json!({ "sheetCount": summary.sheets.len(), "rowCount": rows }),
            };
            Ok((completion, file))
        },
    )
    .await?;

    Ok(Success::created(
        "JSON converted to Excel successfully",
        OperationOutput {
            operation_id: tracked.record.id,
            download_url: download_url(Family::Converter, &tracked.outputs.id),
            file: tracked.outputs,
            result: tracked.result,
        },
    ))
}

pub async fn excel_to_json(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<ExcelToJsonResponse>, ApiError> {
    let mut multipart = multipart?;
    let profile = UploadProfile::spreadsheet(Family::Converter, &state.config.limits);
    let mut form = upload::receive(&mut multipart, &profile, &state.storage).await?;
    let staged = form.take_file(profile.field)?;
    let source = register_upload(&state.db, &staged)?;

    let output_name = derived_name(&source.original_name, "", "json");
    let reserved = state
        .storage
        .reserve(Family::Converter, Stage::Converted, &output_name, "json")?;

    let input = staged.path.clone();
    let output = reserved.path.clone();

    let tracked = track(
        &state,
        OperationKind::ExcelToJson,
        Some(&source.id),
        json!({ "fileName": source.original_name }),
        move || {
            let result = converter::excel_to_json(&input)
                .and_then(|result| write_json(&output, &result.data).map(|()| result));
            discard_output(&output, result)
        },
        |result: &ExcelToJsonResult| {
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
                    "sheetCount": result.sheet_count,
                    "rowCount": result.row_count,
                }),
            };
            Ok((completion, file))
        },
    )
    .await?;

    Ok(Success::ok(
        "Excel converted to JSON successfully",
        ExcelToJsonResponse {
            conversion_id: tracked.record.id,
            source_file_id: source.id,
            download_url: download_url(Family::Converter, &tracked.outputs.id),
            file_id: tracked.outputs.id,
            result: tracked.result,
        },
    ))
}

fn write_json(path: &std::path::Path, data: &Value) -> Result<(), ProcessError> {
    let bytes = serde_json::to_vec_pretty(data)
        .map_err(|e| ProcessError::SpreadsheetProcessing(format!("Failed to encode JSON: {}", e)))?;
    std::fs::write(path, bytes).map_err(|e| ProcessError::WriteDocument {
        path: PathBuf::from(path),
        source: e,
    })
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    super::download(&state.db, &file_id).await
}

pub async fn list_conversions(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Success<Page<OperationRow>>, ApiError> {
    let Query(query) = query?;
    let page = history::list(&state, OperationFamily::Conversion, &query)?;
    Ok(Success::ok("Conversions retrieved successfully", page))
}

pub async fn get_conversion(
    State(state): State<AppState>,
    Path(conversion_id): Path<String>,
) -> Result<Success<OperationRow>, ApiError> {
    let record = history::get(&state, OperationFamily::Conversion, &conversion_id)?;
    Ok(Success::ok("Conversion retrieved successfully", record))
}

pub async fn delete_conversion(
    State(state): State<AppState>,
    Path(conversion_id): Path<String>,
) -> Result<Success<Value>, ApiError> {
    let removed = history::delete(&state, OperationFamily::Conversion, &conversion_id)?;
    Ok(Success::ok(
        "Conversion deleted successfully",
        json!({ "id": conversion_id, "filesRemoved": removed }),
    ))
}
