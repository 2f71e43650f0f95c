//! Upload gate: validates multipart file fields against a per-route profile
//! and streams accepted files into the staging directory of their family.
//!
//! Extension and MIME type are checked before anything touches the disk.
//! The size limit is enforced while streaming, so an oversized file is
//! removed as soon as it crosses the limit.

use std::collections::HashMap;
use std::path::PathBuf;

use axum::extract::multipart::Field;
use axum::extract::Multipart;
use tokio::io::AsyncWriteExt;

use crate::config::LimitsConfig;
use crate::error::{StorageError, UploadError};
use crate::sanitize::{extension_of, redact_path};
use crate::storage::{Family, FileStorage, Stage};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const OCTET_STREAM: &str = "application/octet-stream";

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];
const SPREADSHEET_MIME_TYPES: &[&str] = &[
    XLSX_MIME,
    "application/vnd.ms-excel",
    "text/csv",
    "application/csv",
    "text/plain",
];

const PDF_EXTENSIONS: &[&str] = &["pdf"];
const PDF_MIME_TYPES: &[&str] = &["application/pdf", "application/x-pdf"];

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx", "txt"];
const DOCUMENT_MIME_TYPES: &[&str] = &["application/pdf", DOCX_MIME, "text/plain"];

/// What one route accepts.
#[derive(Debug, Clone)]
pub struct UploadProfile {
    pub family: Family,
    /// Name of the multipart field carrying the file(s).
    pub field: &'static str,
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
    pub max_bytes: u64,
    pub max_files: usize,
}

impl UploadProfile {
    pub fn spreadsheet(family: Family, limits: &LimitsConfig) -> Self {
        Self {
            family,
            field: "file",
            extensions: SPREADSHEET_EXTENSIONS,
            mime_types: SPREADSHEET_MIME_TYPES,
            max_bytes: limits.spreadsheet_max_bytes,
            max_files: 1,
        }
    }

    pub fn pdf(limits: &LimitsConfig) -> Self {
        Self {
            family: Family::Pdf,
            field: "file",
            extensions: PDF_EXTENSIONS,
            mime_types: PDF_MIME_TYPES,
            max_bytes: limits.pdf_max_bytes,
            max_files: 1,
        }
    }

    pub fn pdf_merge(limits: &LimitsConfig) -> Self {
        Self {
            field: "files",
            max_files: limits.merge_max_files,
            ..Self::pdf(limits)
        }
    }

    pub fn document(limits: &LimitsConfig) -> Self {
        Self {
            family: Family::Pdf,
            field: "file",
            extensions: DOCUMENT_EXTENSIONS,
            mime_types: DOCUMENT_MIME_TYPES,
            max_bytes: limits.document_max_bytes,
            max_files: 1,
        }
    }

    /// Checks name and declared type. Returns the lower-cased extension and
    /// the effective MIME type.
    pub fn check(
        &self,
        file_name: &str,
        declared_mime: Option<&str>,
    ) -> Result<(String, String), UploadError> {
        let extension = extension_of(file_name).unwrap_or_default();
        if !self.extensions.contains(&extension.as_str()) {
            return Err(UploadError::ExtensionNotAllowed {
                extension,
                allowed: self
                    .extensions
                    .iter()
                    .map(|e| format!(".{}", e))
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let mime_type = effective_mime(declared_mime, file_name);
        if !self.mime_types.contains(&mime_type.as_str()) {
            return Err(UploadError::MimeNotAllowed {
                mime_type,
                file_name: file_name.to_string(),
            });
        }

        Ok((extension, mime_type))
    }
}

/// The declared content type, or a guess from the file name when the client
/// sent none or a generic one.
fn effective_mime(declared: Option<&str>, file_name: &str) -> String {
    let declared = declared
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty() && m != OCTET_STREAM);

    match declared {
        Some(mime) => mime,
        None => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// A file accepted by the gate and staged on disk.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub stored_name: String,
    pub path: PathBuf,
    pub extension: String,
    pub mime_type: String,
    pub size: u64,
}

/// Staged files plus the plain text fields of the form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    /// Takes the first staged file.
    pub fn take_file(&mut self, field: &'static str) -> Result<UploadedFile, UploadError> {
        if self.files.is_empty() {
            return Err(UploadError::MissingFile(field));
        }
        Ok(self.files.remove(0))
    }

    /// A text field, trimmed; blank values count as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Reads the whole multipart body. On any rejection, files staged earlier
/// in the same request are removed again.
pub async fn receive(
    multipart: &mut Multipart,
    profile: &UploadProfile,
    storage: &FileStorage,
) -> Result<UploadForm, UploadError> {
    let mut form = UploadForm::default();
    match read_fields(multipart, profile, storage, &mut form).await {
        Ok(()) => {
            tracing::debug!(
                files = form.files.len(),
                fields = form.fields.len(),
                "Upload accepted"
            );
            Ok(form)
        }
        Err(e) => {
            let staged: Vec<&PathBuf> = form.files.iter().map(|f| &f.path).collect();
            storage.remove_quietly(&staged);
            tracing::warn!(error = %e, "Upload rejected");
            Err(e)
        }
    }
}

async fn read_fields(
    multipart: &mut Multipart,
    profile: &UploadProfile,
    storage: &FileStorage,
    form: &mut UploadForm,
) -> Result<(), UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Multipart(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_none() {
            let value = field
                .text()
                .await
                .map_err(|e| UploadError::Multipart(e.body_text()))?;
            form.fields.insert(name, value);
            continue;
        }

        if name != profile.field {
            return Err(UploadError::UnexpectedField(name));
        }
        if form.files.len() >= profile.max_files {
            return Err(UploadError::TooManyFiles {
                limit: profile.max_files,
            });
        }

        let file = stage_file(field, profile, storage).await?;
        form.files.push(file);
    }
    Ok(())
}

async fn stage_file(
    mut field: Field<'_>,
    profile: &UploadProfile,
    storage: &FileStorage,
) -> Result<UploadedFile, UploadError> {
    let original_name = field.file_name().unwrap_or_default().to_string();
    let (extension, mime_type) = profile.check(&original_name, field.content_type())?;

    let reserved = storage.reserve(profile.family, Stage::Temp, &original_name, &extension)?;
    let path = reserved.path;

    let written = match stream_to_disk(&mut field, &path, &original_name, profile.max_bytes).await
    {
        Ok(written) => written,
        Err(e) => {
            storage.remove_quietly(&[&path]);
            return Err(e);
        }
    };

    tracing::info!(
        file = %redact_path(&path),
        size = written,
        mime = %mime_type,
        "File staged"
    );

    Ok(UploadedFile {
        original_name,
        stored_name: reserved.stored_name,
        path,
        extension,
        mime_type,
        size: written,
    })
}

async fn stream_to_disk(
    field: &mut Field<'_>,
    path: &PathBuf,
    original_name: &str,
    max_bytes: u64,
) -> Result<u64, UploadError> {
    let write_error = |e: std::io::Error| StorageError::WriteFile {
        path: path.clone(),
        source: e,
    };

    let mut out = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(write_error)?;

    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::Multipart(e.body_text()))?
    {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(UploadError::FileTooLarge {
                file_name: original_name.to_string(),
                limit: max_bytes,
            });
        }
        out.write_all(&chunk).await.map_err(write_error)?;
    }
    out.flush().await.map_err(write_error)?;

    Ok(written)
}
