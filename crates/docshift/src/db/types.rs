//! Enumerated column types stored as text.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                $name::parse(text).ok_or_else(|| {
                    FromSqlError::Other(
                        format!("unknown {} value '{}'", stringify!($name), text).into(),
                    )
                })
            }
        }
    };
}

/// Kind of stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Pdf,
    Excel,
    Json,
    Document,
    Other,
}

text_enum!(FileType {
    Pdf => "PDF",
    Excel => "EXCEL",
    Json => "JSON",
    Document => "DOCUMENT",
    Other => "OTHER",
});

impl FileType {
    /// Infers the type from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => FileType::Pdf,
            "xlsx" | "xls" | "csv" => FileType::Excel,
            "json" => FileType::Json,
            "docx" | "doc" | "txt" => FileType::Document,
            _ => FileType::Other,
        }
    }
}

/// Lifecycle of an operation or conversion record.
///
/// `Processing` moves to exactly one of the terminal states and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

text_enum!(OperationStatus {
    Pending => "PENDING",
    Processing => "PROCESSING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

/// Which history table an operation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationFamily {
    Conversion,
    PdfOperation,
}

impl OperationFamily {
    pub(crate) fn table(self) -> &'static str {
        match self {
            OperationFamily::Conversion => "conversions",
            OperationFamily::PdfOperation => "pdf_operations",
        }
    }

    pub(crate) fn kind_column(self) -> &'static str {
        match self {
            OperationFamily::Conversion => "conversion_type",
            OperationFamily::PdfOperation => "operation_type",
        }
    }

    /// Resource name used in not-found errors.
    pub fn resource(self) -> &'static str {
        match self {
            OperationFamily::Conversion => "Conversion",
            OperationFamily::PdfOperation => "PDF operation",
        }
    }
}

/// The action a record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    JsonToExcel,
    ExcelToJson,
    ExcelWrite,
    ExcelCreate,
    Merge,
    SplitPages,
    SplitRange,
    SplitFixed,
    ExtractPages,
    Compress,
    Watermark,
    DocToPdf,
    PdfToImages,
}

text_enum!(OperationKind {
    JsonToExcel => "JSON_TO_EXCEL",
    ExcelToJson => "EXCEL_TO_JSON",
    ExcelWrite => "EXCEL_WRITE",
    ExcelCreate => "EXCEL_CREATE",
    Merge => "MERGE",
    SplitPages => "SPLIT_PAGES",
    SplitRange => "SPLIT_RANGE",
    SplitFixed => "SPLIT_FIXED",
    ExtractPages => "EXTRACT_PAGES",
    Compress => "COMPRESS",
    Watermark => "WATERMARK",
    DocToPdf => "DOC_TO_PDF",
    PdfToImages => "PDF_TO_IMAGES",
});

impl OperationKind {
    pub fn family(self) -> OperationFamily {
        match self {
            OperationKind::JsonToExcel
            | OperationKind::ExcelToJson
            | OperationKind::ExcelWrite
            | OperationKind::ExcelCreate => OperationFamily::Conversion,
            _ => OperationFamily::PdfOperation,
        }
    }
}
