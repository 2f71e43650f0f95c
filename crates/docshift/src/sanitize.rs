//! Helpers for sanitizing names and paths.
//!
//! Logs and error details are safe to share; span fields carry file names,
//! never full storage paths.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

const MAX_BASE_LEN: usize = 100;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

static RE_UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Reduces an uploaded file name to a safe base name: no directories, no
/// extension, only `[A-Za-z0-9._-]`.
pub fn sanitize_base_name(name: &str) -> String {
    // Browsers on Windows may send full paths.
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = match file_name.rfind('.') {
        Some(pos) if pos > 0 => &file_name[..pos],
        _ => file_name,
    };

    let cleaned = RE_UNSAFE_CHARS.replace_all(stem, "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '_' || c == '.');
    let mut base: String = cleaned.chars().take(MAX_BASE_LEN).collect();
    if base.is_empty() {
        base.push_str("file");
    }
    base
}

/// Lower-cased extension of a file name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file_name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < file_name.len() => {
            Some(file_name[pos + 1..].to_ascii_lowercase())
        }
        _ => None,
    }
}

/// `<base>-<unix millis>-<random>` plus the extension when given.
pub fn generated_name(original_name: &str, extension: Option<&str>) -> String {
    let base = sanitize_base_name(original_name);
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    let suffix = &random[..12];
    match extension {
        Some(ext) => format!("{}-{}-{}.{}", base, millis, suffix, ext),
        None => format!("{}-{}-{}", base, millis, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/srv/uploads/pdf/temp/invoice.pdf")),
            "invoice.pdf"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_sanitize_base_name() {
        assert_eq!(sanitize_base_name("Quarterly Report.xlsx"), "Quarterly_Report");
        assert_eq!(sanitize_base_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_base_name("C:\\Users\\me\\notes.txt"), "notes");
        assert_eq!(sanitize_base_name(".hidden"), "hidden");
        assert_eq!(sanitize_base_name("???.pdf"), "file");
        assert_eq!(sanitize_base_name(""), "file");
    }

    #[test]
    fn test_sanitize_base_name_truncates() {
        let long = format!("{}.pdf", "a".repeat(300));
        assert_eq!(sanitize_base_name(&long).len(), MAX_BASE_LEN);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn test_generated_name_shape() {
        let name = generated_name("My File.pdf", Some("pdf"));
        assert!(name.starts_with("My_File-"));
        assert!(name.ends_with(".pdf"));
        let parts: Vec<_> = name.trim_end_matches(".pdf").split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 12);

        assert_ne!(generated_name("a", None), generated_name("a", None));
    }
}
