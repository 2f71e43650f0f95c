//! PDF routes: merge, split, extract, compress, watermark, document
//! conversion, info and operation history.
//!
//! Form parameters are parsed inside the tracked operation, so a bad
//! parameter still leaves a `FAILED` record pointing at the upload.

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::db::file_repo::{FileRow, Page};
use crate::db::operation_repo::{OperationRow, OUTPUT_FILE_IDS};
use crate::db::{OperationFamily, OperationKind};
use crate::error::ProcessError;
use crate::processor::pdf::{
    self, CompressionLevel, PageRange, PdfInfo, PdfOutput, SplitPart, WatermarkOptions,
    WatermarkPosition,
};
use crate::storage::{Family, Stage};
use crate::upload::{self, UploadForm, UploadProfile, UploadedFile};

use super::envelope::Success;
use super::error::ApiError;
use super::history::{self, HistoryQuery};
use super::lifecycle::{
    discard_output, register_output, register_upload, track, Completion, OperationOutput,
    Tracked,
};
use super::{derived_name, download_url, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/merge", post(merge))
        .route("/split/pages", post(split_pages))
        .route("/split/range", post(split_range))
        .route("/split/fixed", post(split_fixed))
        .route("/extract", post(extract))
        .route("/compress", post(compress))
        .route("/watermark", post(watermark))
        .route("/doc-to-pdf", post(doc_to_pdf))
        .route("/info", post(info))
        .route("/to-images", post(to_images))
        .route("/download/{file_id}", get(download_file))
        .route("/operations", get(list_operations))
        .route(
            "/{operation_id}",
            get(get_operation).delete(delete_operation),
        )
}

// ============================================
// Responses
// ============================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOutput {
    file: FileRow,
    download_url: String,
    #[serde(flatten)]
    part: SplitPart,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitResponse {
    operation_id: String,
    source_file_id: String,
    part_count: usize,
    parts: Vec<SplitOutput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    file_name: String,
    #[serde(flatten)]
    info: PdfInfo,
}

fn single_output<T: Serialize>(tracked: Tracked<T, FileRow>) -> OperationOutput<T> {
    OperationOutput {
        operation_id: tracked.record.id,
        download_url: download_url(Family::Pdf, &tracked.outputs.id),
        file: tracked.outputs,
        result: tracked.result,
    }
}

// ============================================
// Form parameters
// ============================================

/// Parses `ranges` as JSON (`[{"start":1,"end":3}]`) or as text
/// (`1-3,5,7-9`).
pub(crate) fn parse_ranges(raw: Option<&str>) -> Result<Vec<PageRange>, ProcessError> {
    let raw = raw.ok_or_else(|| ProcessError::InvalidInput("ranges is required".to_string()))?;
    if raw.starts_with('[') {
        return serde_json::from_str(raw)
            .map_err(|e| ProcessError::InvalidInput(format!("Invalid ranges JSON: {}", e)));
    }

    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let invalid = || ProcessError::InvalidInput(format!("Invalid page range '{}'", part));
            match part.split_once('-') {
                Some((start, end)) => Ok(PageRange {
                    start: start.trim().parse().map_err(|_| invalid())?,
                    end: end.trim().parse().map_err(|_| invalid())?,
                }),
                None => {
                    let page = part.parse().map_err(|_| invalid())?;
                    Ok(PageRange {
                        start: page,
                        end: page,
                    })
                }
            }
        })
        .collect()
}

/// Parses `pages` as a JSON array or a comma-separated list. Order and
/// duplicates are kept.
pub(crate) fn parse_pages(raw: Option<&str>) -> Result<Vec<u32>, ProcessError> {
    let raw = raw.ok_or_else(|| ProcessError::InvalidInput("pages is required".to_string()))?;
    let pages: Vec<u32> = if raw.starts_with('[') {
        serde_json::from_str(raw)
            .map_err(|e| ProcessError::InvalidInput(format!("Invalid pages JSON: {}", e)))?
    } else {
        raw.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse()
                    .map_err(|_| ProcessError::InvalidInput(format!("Invalid page number '{}'", p)))
            })
            .collect::<Result<_, _>>()?
    };

    if pages.is_empty() {
        return Err(ProcessError::InvalidInput(
            "At least one page number is required".to_string(),
        ));
    }
    Ok(pages)
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, ProcessError> {
    raw.map(|value| {
        value
            .parse()
            .map_err(|_| ProcessError::InvalidInput(format!("{} must be a number, got '{}'", name, value)))
    })
    .transpose()
}

pub(crate) fn parse_level(raw: Option<&str>) -> Result<CompressionLevel, ProcessError> {
    match raw {
        None => Ok(CompressionLevel::default()),
        Some(value) => CompressionLevel::parse(&value.to_ascii_lowercase()).ok_or_else(|| {
            let allowed: Vec<&str> = CompressionLevel::ALL.iter().map(|l| l.as_str()).collect();
            ProcessError::InvalidInput(format!(
                "Invalid compression level '{}'. Allowed: {}",
                value,
                allowed.join(", ")
            ))
        }),
    }
}

pub(crate) fn watermark_options(form: &UploadForm) -> Result<WatermarkOptions, ProcessError> {
    let mut options = WatermarkOptions::default();
    if let Some(opacity) = parse_number("opacity", form.field("opacity"))? {
        options.opacity = opacity;
    }
    if let Some(size) = parse_number("fontSize", form.field("fontSize"))? {
        options.font_size = size;
    }
    if let Some(rotation) = parse_number("rotation", form.field("rotation"))? {
        options.rotation = rotation;
    }
    if let Some(position) = form.field("position") {
        options.position =
            WatermarkPosition::parse(&position.to_ascii_lowercase()).ok_or_else(|| {
                ProcessError::InvalidInput(format!(
                    "Invalid position '{}'. Allowed: center, diagonal, top, bottom",
                    position
                ))
            })?;
    }
    if let Some(color) = form.field("color") {
        options.color = pdf::parse_color(color)?;
    }
    Ok(options)
}

fn request_options(fields: &HashMap<String, String>) -> Value {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();
    Value::Object(
        keys.into_iter()
            .map(|k| (k.clone(), Value::String(fields[k].clone())))
            .collect(),
    )
}

// ============================================
// Shared flows
// ============================================

/// One uploaded source PDF (or document), registered in the catalogue.
struct SourceUpload {
    form: UploadForm,
    staged: UploadedFile,
    source: FileRow,
}

async fn receive_source(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
    profile: UploadProfile,
) -> Result<SourceUpload, ApiError> {
    let mut multipart = multipart?;
    let mut form = upload::receive(&mut multipart, &profile, &state.storage).await?;
    let staged = form.take_file(profile.field)?;
    let source = register_upload(&state.db, &staged)?;
    Ok(SourceUpload {
        form,
        staged,
        source,
    })
}

/// Runs an operation writing one PDF into `stage`.
async fn run_single<T, W>(
    state: &AppState,
    kind: OperationKind,
    upload: SourceUpload,
    stage: Stage,
    suffix: &str,
    work: W,
) -> Result<Tracked<T, FileRow>, ApiError>
where
    T: Serialize + Send + 'static,
    W: FnOnce(&FsPath, &FsPath, &UploadForm) -> Result<T, ProcessError> + Send + 'static,
{
    let SourceUpload {
        form,
        staged,
        source,
    } = upload;

    let output_name = derived_name(&source.original_name, suffix, "pdf");
    let reserved = state
        .storage
        .reserve(Family::Pdf, stage, &output_name, "pdf")?;
    let output = reserved.path.clone();
    let options = request_options(&form.fields);

    track(
        state,
        kind,
        Some(&source.id),
        options,
        move || discard_output(&output, work(&staged.path, &output, &form)),
        |result: &T| {
            let file = register_output(
                &state.db,
                &reserved.path,
                &reserved.stored_name,
                &output_name,
                json!({ "sourceFileId": source.id }),
            )?;
            let options = serde_json::to_value(result)
                .map_err(|e| ApiError::internal(format!("Failed to encode result: {}", e)))?;
            let completion = Completion {
                output_file_id: Some(file.id.clone()),
                options,
            };
            Ok((completion, file))
        },
    )
    .await
}

/// Runs a split into a fresh per-operation directory and registers every
/// part as its own file.
async fn run_split<W>(
    state: &AppState,
    kind: OperationKind,
    upload: SourceUpload,
    work: W,
) -> Result<SplitResponse, ApiError>
where
    W: FnOnce(&FsPath, &FsPath, &UploadForm) -> Result<Vec<SplitPart>, ProcessError>
        + Send
        + 'static,
{
    let SourceUpload {
        form,
        staged,
        source,
    } = upload;

    let dir = state
        .storage
        .operation_dir(Family::Pdf, Stage::Split, &source.original_name)?;
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let work_dir = dir.clone();
    let options = request_options(&form.fields);

    let tracked = track(
        state,
        kind,
        Some(&source.id),
        options,
        move || work(&staged.path, &work_dir, &form),
        |parts: &Vec<SplitPart>| register_parts(state, &source, &dir_name, parts),
    )
    .await?;

    let parts: Vec<SplitOutput> = tracked
        .result
        .into_iter()
        .zip(tracked.outputs)
        .map(|(part, file)| SplitOutput {
            download_url: download_url(Family::Pdf, &file.id),
            file,
            part,
        })
        .collect();

    Ok(SplitResponse {
        operation_id: tracked.record.id,
        source_file_id: source.id,
        part_count: parts.len(),
        parts,
    })
}

fn register_parts(
    state: &AppState,
    source: &FileRow,
    dir_name: &str,
    parts: &[SplitPart],
) -> Result<(Completion, Vec<FileRow>), ApiError> {
    let mut files = Vec::with_capacity(parts.len());
    for part in parts {
        let part_stem = part.file_name.trim_end_matches(".pdf");
        let file = register_output(
            &state.db,
            &part.path,
            &format!("{}/{}", dir_name, part.file_name),
            &derived_name(&source.original_name, &format!("_{}", part_stem), "pdf"),
            json!({
                "sourceFileId": source.id,
                "startPage": part.start_page,
                "endPage": part.end_page,
            }),
        )?;
        files.push(file);
    }

    let ids: Vec<Value> = files.iter().map(|f| Value::String(f.id.clone())).collect();
    let mut options = Map::new();
    options.insert("partCount".to_string(), json!(parts.len()));
    options.insert(OUTPUT_FILE_IDS.to_string(), Value::Array(ids));

    let completion = Completion {
        output_file_id: None,
        options: Value::Object(options),
    };
    Ok((completion, files))
}

// ============================================
// Handlers
// ============================================

pub async fn merge(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<OperationOutput<PdfOutput>>, ApiError> {
    let mut multipart = multipart?;
    let profile = UploadProfile::pdf_merge(&state.config.limits);
    let form = upload::receive(&mut multipart, &profile, &state.storage).await?;

    let inputs: Vec<PathBuf> = form.files.iter().map(|f| f.path.clone()).collect();
    let names: Vec<&str> = form.files.iter().map(|f| f.original_name.as_str()).collect();
    let options = json!({ "fileCount": inputs.len(), "inputFiles": names });

    let output_name = "merged.pdf";
    let reserved = state
        .storage
        .reserve(Family::Pdf, Stage::Merged, output_name, "pdf")?;
    let output = reserved.path.clone();
    let work_inputs = inputs.clone();

    let tracked = track(
        &state,
        OperationKind::Merge,
        None,
        options,
        move || discard_output(&output, pdf::merge(&work_inputs, &output)),
        |merged: &PdfOutput| {
            let file = register_output(
                &state.db,
                &reserved.path,
                &reserved.stored_name,
                output_name,
                json!({ "pageCount": merged.page_count }),
            )?;
            let completion = Completion {
                output_file_id: Some(file.id.clone()),
                options: json!({ "pageCount": merged.page_count, "size": merged.size }),
            };
            Ok((completion, file))
        },
    )
    .await;

    // The staged inputs are never catalogued.
    state.storage.remove_quietly(&inputs);
    let tracked = tracked?;

    Ok(Success::created(
        "PDFs merged successfully",
        single_output(tracked),
    ))
}

pub async fn split_pages(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<SplitResponse>, ApiError> {
    let upload = receive_source(&state, multipart, UploadProfile::pdf(&state.config.limits)).await?;
    let response = run_split(&state, OperationKind::SplitPages, upload, |input, dir, _| {
        pdf::split_to_pages(input, dir)
    })
    .await?;
    Ok(Success::created("PDF split into pages successfully", response))
}

pub async fn split_range(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<SplitResponse>, ApiError> {
    let upload = receive_source(&state, multipart, UploadProfile::pdf(&state.config.limits)).await?;
    let response = run_split(&state, OperationKind::SplitRange, upload, |input, dir, form| {
        let ranges = parse_ranges(form.field("ranges"))?;
        pdf::split_by_range(input, &ranges, dir)
    })
    .await?;
    Ok(Success::created("PDF split by ranges successfully", response))
}

pub async fn split_fixed(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<SplitResponse>, ApiError> {
    let upload = receive_source(&state, multipart, UploadProfile::pdf(&state.config.limits)).await?;
    let response = run_split(&state, OperationKind::SplitFixed, upload, |input, dir, form| {
        let pages_per_file = parse_number::<u32>("pagesPerFile", form.field("pagesPerFile"))?
            .ok_or_else(|| ProcessError::InvalidInput("pagesPerFile is required".to_string()))?;
        pdf::split_by_fixed(input, pages_per_file, dir)
    })
    .await?;
    Ok(Success::created("PDF split into fixed parts successfully", response))
}

pub async fn extract(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<OperationOutput<PdfOutput>>, ApiError> {
    let upload = receive_source(&state, multipart, UploadProfile::pdf(&state.config.limits)).await?;
    let tracked = run_single(
        &state,
        OperationKind::ExtractPages,
        upload,
        Stage::Processed,
        "_extracted",
        |input, output, form| {
            let pages = parse_pages(form.field("pages"))?;
            pdf::extract_pages(input, &pages, output)
        },
    )
    .await?;
    Ok(Success::created("Pages extracted successfully", single_output(tracked)))
}

pub async fn compress(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<OperationOutput<pdf::CompressionReport>>, ApiError> {
    let upload = receive_source(&state, multipart, UploadProfile::pdf(&state.config.limits)).await?;
    let tracked = run_single(
        &state,
        OperationKind::Compress,
        upload,
        Stage::Compressed,
        "_compressed",
        |input, output, form| {
            let level = parse_level(form.field("level"))?;
            pdf::compress(input, level, output)
        },
    )
    .await?;
    Ok(Success::created("PDF compressed successfully", single_output(tracked)))
}

pub async fn watermark(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<OperationOutput<PdfOutput>>, ApiError> {
    let upload = receive_source(&state, multipart, UploadProfile::pdf(&state.config.limits)).await?;
    let tracked = run_single(
        &state,
        OperationKind::Watermark,
        upload,
        Stage::Watermarked,
        "_watermarked",
        |input, output, form| {
            let text = form
                .field("text")
                .ok_or_else(|| ProcessError::InvalidInput("Watermark text is required".to_string()))?;
            let options = watermark_options(form)?;
            pdf::add_watermark(input, text, &options, output)
        },
    )
    .await?;
    Ok(Success::created("Watermark added successfully", single_output(tracked)))
}

pub async fn doc_to_pdf(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<OperationOutput<PdfOutput>>, ApiError> {
    let upload =
        receive_source(&state, multipart, UploadProfile::document(&state.config.limits)).await?;
    let tracked = run_single(
        &state,
        OperationKind::DocToPdf,
        upload,
        Stage::Converted,
        "",
        |input, output, _| pdf::document_to_pdf(input, output),
    )
    .await?;
    Ok(Success::created("Document converted to PDF successfully", single_output(tracked)))
}

/// Reads metadata from an uploaded PDF. Not tracked; the upload is removed
/// afterwards.
pub async fn info(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<InfoResponse>, ApiError> {
    let mut multipart = multipart?;
    let profile = UploadProfile::pdf(&state.config.limits);
    let mut form = upload::receive(&mut multipart, &profile, &state.storage).await?;
    let staged = form.take_file(profile.field)?;

    let path = staged.path.clone();
    let outcome = tokio::task::spawn_blocking(move || pdf::get_info(&path)).await;
    state.storage.remove_quietly(&[&staged.path]);
    let info = outcome??;

    Ok(Success::ok(
        "PDF info retrieved successfully",
        InfoResponse {
            file_name: staged.original_name,
            info,
        },
    ))
}

/// Always fails with `FEATURE_UNAVAILABLE`, recording a `FAILED` operation.
pub async fn to_images(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Success<Value>, ApiError> {
    let SourceUpload { staged, source, form } =
        receive_source(&state, multipart, UploadProfile::pdf(&state.config.limits)).await?;

    let input = staged.path.clone();
    let tracked = track(
        &state,
        OperationKind::PdfToImages,
        Some(&source.id),
        request_options(&form.fields),
        move || pdf::pdf_to_images(&input),
        |images: &Vec<PathBuf>| {
            let completion = Completion {
                output_file_id: None,
                options: json!({ "imageCount": images.len() }),
            };
            Ok((completion, ()))
        },
    )
    .await?;

    Ok(Success::ok(
        "PDF converted to images",
        json!({ "operationId": tracked.record.id }),
    ))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    super::download(&state.db, &file_id).await
}

pub async fn list_operations(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Success<Page<OperationRow>>, ApiError> {
    let Query(query) = query?;
    let page = history::list(&state, OperationFamily::PdfOperation, &query)?;
    Ok(Success::ok("Operations retrieved successfully", page))
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Success<OperationRow>, ApiError> {
    let record = history::get(&state, OperationFamily::PdfOperation, &operation_id)?;
    Ok(Success::ok("Operation retrieved successfully", record))
}

pub async fn delete_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Success<Value>, ApiError> {
    let removed = history::delete(&state, OperationFamily::PdfOperation, &operation_id)?;
    Ok(Success::ok(
        "Operation deleted successfully",
        json!({ "id": operation_id, "filesRemoved": removed }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges_text() {
        let ranges = parse_ranges(Some("1-3, 5 ,7-9")).unwrap();
        assert_eq!(
            ranges,
            vec![
                PageRange { start: 1, end: 3 },
                PageRange { start: 5, end: 5 },
                PageRange { start: 7, end: 9 },
            ]
        );
    }

    #[test]
    fn test_parse_ranges_json() {
        let ranges = parse_ranges(Some(r#"[{"start":2,"end":4}]"#)).unwrap();
        assert_eq!(ranges, vec![PageRange { start: 2, end: 4 }]);
    }

    #[test]
    fn test_parse_ranges_errors() {
        assert!(parse_ranges(None).is_err());
        let err = parse_ranges(Some("1-x")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid page range '1-x'");
    }

    #[test]
    fn test_parse_pages_keeps_order_and_duplicates() {
        assert_eq!(parse_pages(Some("3,1,2,3")).unwrap(), vec![3, 1, 2, 3]);
        assert_eq!(parse_pages(Some("[5, 4]")).unwrap(), vec![5, 4]);
        assert!(parse_pages(Some(" , ")).is_err());
        assert!(parse_pages(Some("1,two")).is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(None).unwrap(), CompressionLevel::Recommended);
        assert_eq!(parse_level(Some("EXTREME")).unwrap(), CompressionLevel::Extreme);
        let err = parse_level(Some("max")).unwrap_err();
        assert!(err.to_string().contains("extreme, recommended, low"));
    }

    #[test]
    fn test_watermark_options_from_form() {
        let mut form = UploadForm::default();
        form.fields.insert("opacity".into(), "0.5".into());
        form.fields.insert("position".into(), "Diagonal".into());
        form.fields.insert("color".into(), "1,0,0".into());

        let options = watermark_options(&form).unwrap();
        assert_eq!(options.opacity, 0.5);
        assert_eq!(options.position, WatermarkPosition::Diagonal);
        assert_eq!(options.color, [1.0, 0.0, 0.0]);
        assert_eq!(options.font_size, 48.0);

        form.fields.insert("fontSize".into(), "big".into());
        assert!(watermark_options(&form).is_err());
    }

    #[test]
    fn test_request_options_sorted() {
        let mut fields = HashMap::new();
        fields.insert("level".to_string(), "low".to_string());
        fields.insert("extra".to_string(), "1".to_string());
        let options = request_options(&fields);
        let keys: Vec<&String> = options.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["extra", "level"]);
    }
}
