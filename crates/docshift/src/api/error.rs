//! HTTP error taxonomy and the error envelope.
//!
//! Typed errors from the lower layers keep their kind until they reach this
//! module, where each is mapped to exactly one status and error code.

use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::db::{now_timestamp, DatabaseError};
use crate::error::{ProcessError, StorageError, UploadError};

use super::AppState;

/// Error categories exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    FileProcessing,
    Database,
    /// Defined for completeness; no route authenticates.
    Unauthorized,
    Forbidden,
    FeatureUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::FileProcessing => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::FeatureUnavailable => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::FileProcessing => "FILE_PROCESSING_ERROR",
            ErrorKind::Database => "DATABASE_ERROR",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::FeatureUnavailable => "FEATURE_UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Operational errors are expected and shown to clients as-is.
    fn is_operational(self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub error_code: &'static str,
    pub details: Option<Value>,
    /// Source chain, only ever shown in development.
    pub trace: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            error_code: kind.code(),
            details: None,
            trace: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn file_processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileProcessing, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.error_code = code;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn with_trace(mut self, err: &(dyn std::error::Error + 'static)) -> Self {
        self.trace = Some(error_chain(err));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.error_code)
    }
}

impl std::error::Error for ApiError {}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![format!("{:?}", err)];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        let api = match &err {
            ProcessError::FileNotFound { .. } => ApiError::not_found("File not found"),
            ProcessError::SheetNotFound(_) => ApiError::not_found(err.to_string()),
            ProcessError::InvalidInput(message) => ApiError::validation(message.clone()),
            ProcessError::UnsupportedFormat(_) => ApiError::validation(err.to_string()),
            ProcessError::PdfProcessing(_)
            | ProcessError::DocxProcessing(_)
            | ProcessError::SpreadsheetProcessing(_) => ApiError::file_processing(err.to_string()),
            ProcessError::FeatureUnavailable { .. } => {
                ApiError::new(ErrorKind::FeatureUnavailable, err.to_string())
            }
            ProcessError::ReadDocument { .. } | ProcessError::WriteDocument { .. } => {
                ApiError::internal(err.to_string())
            }
        };
        api.with_trace(&err)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        let api = match &err {
            DatabaseError::NotFound { .. } => ApiError::not_found(err.to_string()),
            DatabaseError::UniqueViolation(_) => {
                ApiError::new(ErrorKind::Conflict, "Duplicate entry").with_code("DUPLICATE_ENTRY")
            }
            DatabaseError::ForeignKeyViolation(_) => {
                ApiError::validation("Referenced record does not exist")
                    .with_code("INVALID_REFERENCE")
            }
            DatabaseError::InvalidTransition { .. } => {
                ApiError::new(ErrorKind::Conflict, err.to_string())
            }
            _ => ApiError::new(ErrorKind::Database, "Database operation failed"),
        };
        api.with_trace(&err)
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let api = match &err {
            UploadError::FileTooLarge { limit, .. } => ApiError::validation(err.to_string())
                .with_code("FILE_TOO_LARGE")
                .with_details(serde_json::json!({ "maxBytes": limit })),
            UploadError::TooManyFiles { limit } => ApiError::validation(err.to_string())
                .with_code("TOO_MANY_FILES")
                .with_details(serde_json::json!({ "maxFiles": limit })),
            UploadError::UnexpectedField(_) => {
                ApiError::validation(err.to_string()).with_code("UNEXPECTED_FIELD")
            }
            UploadError::Storage(_) => ApiError::internal(err.to_string()),
            _ => ApiError::validation(err.to_string()),
        };
        api.with_trace(&err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::internal(err.to_string()).with_trace(&err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::internal(format!("Background task failed: {}", err)).with_trace(&err)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    message: &'a str,
    status_code: u16,
    error_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: ErrorBody<'a>,
}

/// Response extension carrying the source chain to [`attach_stack`].
#[derive(Debug, Clone)]
struct ErrorTrace(String);

const GENERIC_MESSAGE: &str = "Internal server error";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.kind.is_operational() {
            self.message.as_str()
        } else {
            tracing::error!(
                error = %self.message,
                trace = self.trace.as_deref().unwrap_or(""),
                "Unexpected error"
            );
            GENERIC_MESSAGE
        };
        if self.kind.is_operational() && status.is_server_error() {
            tracing::error!(error = %self.message, code = self.error_code, "Request failed");
        } else if status.is_client_error() {
            tracing::debug!(error = %self.message, code = self.error_code, "Request rejected");
        }

        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                message,
                status_code: status.as_u16(),
                error_code: self.error_code,
                details: self.details.as_ref(),
                timestamp: now_timestamp(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        let trace = match self.trace {
            Some(trace) => trace,
            None => self.message.clone(),
        };
        response.extensions_mut().insert(ErrorTrace(trace));
        response
    }
}

/// Adds `error.stack` to error envelopes when running in development.
pub async fn attach_stack(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if !state.config.environment.is_development() {
        return response;
    }
    let Some(ErrorTrace(trace)) = response.extensions().get::<ErrorTrace>().cloned() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer error body");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let mut envelope: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };
    if let Some(error) = envelope.get_mut("error").and_then(Value::as_object_mut) {
        error.insert("stack".to_string(), Value::String(trace));
    }

    match serde_json::to_vec(&envelope) {
        Ok(body) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(body))
        }
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}

/// Fallback for unmatched routes.
pub async fn route_not_found(request: Request) -> ApiError {
    ApiError::not_found(format!(
        "Route {} {} not found",
        request.method(),
        request.uri().path()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_kinds_survive() {
        let err: ApiError = ProcessError::InvalidInput("Page 9 out of range".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Page 9 out of range");

        let err: ApiError = ProcessError::PdfProcessing("bad xref".into()).into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_code, "FILE_PROCESSING_ERROR");

        let err: ApiError = ProcessError::FeatureUnavailable {
            feature: "PDF to image conversion",
            requires: "pdftoppm",
        }
        .into();
        assert_eq!(err.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.error_code, "FEATURE_UNAVAILABLE");
    }

    #[test]
    fn test_database_errors_mapped() {
        let err: ApiError = DatabaseError::not_found("File", "abc").into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.message, "File with identifier 'abc' not found");

        let err: ApiError = DatabaseError::UniqueViolation("file_tags".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.error_code, "DUPLICATE_ENTRY");

        let err: ApiError = DatabaseError::ForeignKeyViolation("files".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = DatabaseError::LockPoisoned.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code, "DATABASE_ERROR");
    }

    #[test]
    fn test_upload_errors_are_validation() {
        let err: ApiError = UploadError::FileTooLarge {
            file_name: "big.pdf".into(),
            limit: 10,
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code, "FILE_TOO_LARGE");
        assert_eq!(err.details, Some(serde_json::json!({ "maxBytes": 10 })));

        let err: ApiError = UploadError::UnexpectedField("attachment".into()).into();
        assert_eq!(err.error_code, "UNEXPECTED_FIELD");
    }

    #[test]
    fn test_auth_kinds() {
        let err = ApiError::unauthorized("Missing token");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code, "UNAUTHORIZED");
        assert!(err.kind.is_operational());

        let err = ApiError::forbidden("Read-only key");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_code, "FORBIDDEN");
    }

    #[test]
    fn test_trace_includes_sources() {
        let err: ApiError = ProcessError::ReadDocument {
            path: "in.pdf".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.trace.unwrap().contains("caused by: denied"));
    }
}
