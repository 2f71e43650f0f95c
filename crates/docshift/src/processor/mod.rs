//! Document services. Every operation reads its input from disk, calls the
//! underlying document library and writes its output to disk.
//!
//! All functions here are blocking; the HTTP layer runs them on the blocking
//! thread pool.

pub mod converter;
pub mod docx;
pub mod pdf;
pub mod spreadsheet;
pub mod text;

use std::path::Path;

use crate::error::ProcessError;

/// Formats the services know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
    Xlsx,
    Xls,
    Csv,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ProcessError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(extension)
            .ok_or_else(|| ProcessError::UnsupportedFormat(extension.to_string()))
    }
}

/// Pulls plain text out of a document for re-flowing into a PDF.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ProcessError>;
    fn supports(&self, format: DocumentFormat) -> bool;
}

pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(text::PlainTextExtractor),
                Box::new(docx::DocxExtractor),
                Box::new(pdf::PdfExtractor),
            ],
        }
    }

    pub fn extract(&self, path: &Path) -> Result<String, ProcessError> {
        ensure_exists(path)?;
        let format = DocumentFormat::from_path(path)?;

        for extractor in &self.extractors {
            if extractor.supports(format) {
                return extractor.extract(path);
            }
        }

        Err(ProcessError::UnsupportedFormat(format!("{:?}", format).to_lowercase()))
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fails with `FileNotFound` unless `path` is an existing file. Returns its size.
pub fn ensure_exists(path: &Path) -> Result<u64, ProcessError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(ProcessError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}
