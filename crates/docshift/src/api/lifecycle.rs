//! Operation lifecycle shared by every tracked route.
//!
//! A record is created as `PROCESSING`, the service runs on the blocking
//! pool, and the record is then moved to `COMPLETED` (with its outputs) or
//! `FAILED` (with the message) exactly once. A reserved output whose service
//! call fails is deleted; output files already written when a later step
//! fails stay on disk.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::db::file_repo::{self, FileRow, NewFile};
use crate::db::operation_repo::{self, OperationRow};
use crate::db::{log_repo, Database, FileType, OperationKind, OperationStatus};
use crate::error::ProcessError;
use crate::sanitize::redact_path;
use crate::upload::UploadedFile;

use super::error::ApiError;
use super::AppState;

/// What a finished service call writes back onto its record.
#[derive(Debug, Default)]
pub struct Completion {
    pub output_file_id: Option<String>,
    /// Merged over the request options.
    pub options: Value,
}

/// A completed operation: its record, the service result and whatever the
/// persist step registered.
#[derive(Debug)]
pub struct Tracked<T, R> {
    pub record: OperationRow,
    pub result: T,
    pub outputs: R,
}

/// Response body for operations producing one downloadable file.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutput<T: Serialize> {
    pub operation_id: String,
    pub file: FileRow,
    pub download_url: String,
    #[serde(flatten)]
    pub result: T,
}

/// Runs `work` as a tracked operation of `kind`.
///
/// `persist` turns the service result into output file rows and
/// result-derived options; it runs after `work` succeeds and its failure
/// also marks the record `FAILED`.
pub async fn track<T, R, W, P>(
    state: &AppState,
    kind: OperationKind,
    source_file_id: Option<&str>,
    options: Value,
    work: W,
    persist: P,
) -> Result<Tracked<T, R>, ApiError>
where
    T: Send + 'static,
    W: FnOnce() -> Result<T, ProcessError> + Send + 'static,
    P: FnOnce(&T) -> Result<(Completion, R), ApiError>,
{
    let db = &state.db;
    let family = kind.family();
    let record = operation_repo::create(db, kind, source_file_id, &options)?;

    let log_id = match source_file_id {
        Some(file_id) => match log_repo::start(db, file_id, kind) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, file_id, "Failed to open processing log");
                None
            }
        },
        None => None,
    };

    tracing::info!(operation = %record.id, kind = %kind, "Operation started");

    let outcome = run(work).await.and_then(|result| {
        let (completion, outputs) = persist(&result)?;
        let options = merge_options(options, completion.options);
        let record = operation_repo::complete(
            db,
            family,
            &record.id,
            completion.output_file_id.as_deref(),
            &options,
        )?;
        Ok(Tracked {
            record,
            result,
            outputs,
        })
    });

    match outcome {
        Ok(tracked) => {
            tracing::info!(operation = %tracked.record.id, kind = %kind, "Operation completed");
            close_log(db, log_id, OperationStatus::Completed, None);
            Ok(tracked)
        }
        Err(err) => {
            tracing::warn!(
                operation = %record.id,
                kind = %kind,
                error = %err.message,
                "Operation failed"
            );
            if let Err(e) = operation_repo::fail(db, family, &record.id, &err.message) {
                tracing::error!(operation = %record.id, error = %e, "Failed to mark operation FAILED");
            }
            close_log(db, log_id, OperationStatus::Failed, Some(&err.message));
            Err(err)
        }
    }
}

/// Deletes the reserved output of a service call that failed. Nothing has
/// been registered for it yet.
pub fn discard_output<T>(output: &Path, result: Result<T, ProcessError>) -> Result<T, ProcessError> {
    if result.is_err() {
        match std::fs::remove_file(output) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(file = %redact_path(output), error = %e, "Failed to discard output");
            }
        }
    }
    result
}

async fn run<T, W>(work: W) -> Result<T, ApiError>
where
    T: Send + 'static,
    W: FnOnce() -> Result<T, ProcessError> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}

fn close_log(db: &Database, log_id: Option<i64>, status: OperationStatus, details: Option<&str>) {
    if let Some(id) = log_id {
        if let Err(e) = log_repo::finish(db, id, status, details) {
            tracing::warn!(log_id = id, error = %e, "Failed to close processing log");
        }
    }
}

fn merge_options(base: Value, extra: Value) -> Value {
    match (base, extra) {
        (Value::Object(mut base), Value::Object(extra)) => {
            base.extend(extra);
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, extra) => extra,
    }
}

/// Records a staged upload as an unprocessed file.
pub fn register_upload(db: &Database, upload: &UploadedFile) -> Result<FileRow, ApiError> {
    let row = file_repo::insert(
        db,
        &NewFile {
            original_name: upload.original_name.clone(),
            stored_name: upload.stored_name.clone(),
            path: upload.path.to_string_lossy().into_owned(),
            file_type: FileType::from_extension(&upload.extension),
            size: upload.size as i64,
            mime_type: upload.mime_type.clone(),
            processed: false,
            metadata: Value::Object(Default::default()),
        },
    )?;
    Ok(row)
}

/// Records a file written by a service as a processed output.
pub fn register_output(
    db: &Database,
    path: &Path,
    stored_name: &str,
    original_name: &str,
    metadata: Value,
) -> Result<FileRow, ApiError> {
    let size = std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| ApiError::internal(format!("Output {} missing: {}", redact_path(path), e)))?;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let row = file_repo::insert(
        db,
        &NewFile {
            original_name: original_name.to_string(),
            stored_name: stored_name.to_string(),
            path: path.to_string_lossy().into_owned(),
            file_type: FileType::from_extension(extension),
            size: size as i64,
            mime_type: mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            processed: true,
            metadata,
        },
    )?;
    Ok(row)
}
