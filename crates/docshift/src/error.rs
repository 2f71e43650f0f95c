use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocshiftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid environment override {name}={value}: {reason}")]
    InvalidOverride {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Failures raised by the document services.
///
/// Variants keep the kind of the original failure so the HTTP layer can map
/// them to the right status instead of collapsing everything into one code.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write document '{path}': {source}")]
    WriteDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Sheet '{0}' not found in workbook")]
    SheetNotFound(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process DOCX: {0}")]
    DocxProcessing(String),

    #[error("Failed to process spreadsheet: {0}")]
    SpreadsheetProcessing(String),

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("{feature} is not available yet; it requires {requires}")]
    FeatureUnavailable {
        feature: &'static str,
        requires: &'static str,
    },
}

impl From<lopdf::Error> for ProcessError {
    fn from(err: lopdf::Error) -> Self {
        ProcessError::PdfProcessing(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

/// Rejections produced by the upload gate.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid file type '.{extension}'. Allowed types: {allowed}")]
    ExtensionNotAllowed { extension: String, allowed: String },

    #[error("Invalid MIME type '{mime_type}' for '{file_name}'")]
    MimeNotAllowed { mime_type: String, file_name: String },

    #[error("File '{file_name}' is too large. Maximum size is {limit} bytes")]
    FileTooLarge { file_name: String, limit: u64 },

    #[error("Too many files. Maximum is {limit}")]
    TooManyFiles { limit: usize },

    #[error("Unexpected file field '{0}'")]
    UnexpectedField(String),

    #[error("No file uploaded in field '{0}'")]
    MissingFile(&'static str),

    #[error("Malformed multipart request: {0}")]
    Multipart(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, DocshiftError>;
