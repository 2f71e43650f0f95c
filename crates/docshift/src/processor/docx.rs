use std::io::Read;
use std::path::Path;

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use quick_xml::Reader;

use crate::error::ProcessError;
use crate::processor::{DocumentFormat, TextExtractor};

/// Extracts paragraph text from `word/document.xml`. Formatting, images and
/// tables-as-structure are dropped.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.docx.extract").entered();

        let file = std::fs::File::open(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| ProcessError::DocxProcessing(format!("Failed to open DOCX: {}", e)))?;

        extract_docx_text(&mut archive)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Docx)
    }
}

fn extract_docx_text<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<String, ProcessError> {
    let mut document_xml = archive
        .by_name("word/document.xml")
        .map_err(|e| ProcessError::DocxProcessing(format!("Failed to find document.xml: {}", e)))?;

    let mut xml_content = String::new();
    document_xml
        .read_to_string(&mut xml_content)
        .map_err(|e| ProcessError::DocxProcessing(format!("Failed to read document.xml: {}", e)))?;

    parse_docx_xml(&xml_content)
}

pub(crate) fn parse_docx_xml(xml: &str) -> Result<String, ProcessError> {
    let mut reader = Reader::from_str(xml);

    let mut text = String::new();
    let mut in_text_element = false;
    let mut in_paragraph = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = true,
                b"p" => in_paragraph = true,
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => {
                    if in_paragraph {
                        text.push('\n');
                        in_paragraph = false;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" | b"cr" => text.push('\n'),
                // A self-closing paragraph is an empty line.
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element {
                    let decoded = e.xml_content().map_err(|err| {
                        ProcessError::DocxProcessing(format!("Invalid text encoding: {}", err))
                    })?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text_element {
                    text.push(resolve_reference(&e)?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProcessError::DocxProcessing(format!(
                    "XML parsing error: {}",
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(text)
}

/// `&#169;` style character references and the five predefined XML entities.
fn resolve_reference(reference: &BytesRef<'_>) -> Result<char, ProcessError> {
    let invalid = |detail: String| {
        ProcessError::DocxProcessing(format!("Invalid entity reference: {}", detail))
    };

    if let Some(ch) = reference
        .resolve_char_ref()
        .map_err(|e| invalid(e.to_string()))?
    {
        return Ok(ch);
    }

    let name = reference.decode().map_err(|e| invalid(e.to_string()))?;
    resolve_predefined_entity(&name)
        .and_then(|value| value.chars().next())
        .ok_or_else(|| invalid(format!("&{};", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn write_docx(path: &Path, body: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", options).unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document {}><w:body>{}</w:body></w:document>"#,
            NS, body
        )
        .unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_supports_docx_format() {
        assert!(DocxExtractor.supports(DocumentFormat::Docx));
        assert!(!DocxExtractor.supports(DocumentFormat::Pdf));
        assert!(!DocxExtractor.supports(DocumentFormat::Text));
    }

    #[test]
    fn test_parse_paragraphs() {
        let xml = format!(
            r#"<w:document {}><w:body>
                <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> World</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second</w:t><w:tab/><w:t>col</w:t></w:r></w:p>
            </w:body></w:document>"#,
            NS
        );

        let text = parse_docx_xml(&xml).unwrap();
        assert_eq!(text, "Hello World\nSecond\tcol\n");
    }

    #[test]
    fn test_text_outside_runs_is_ignored() {
        let xml = format!(
            r#"<w:document {}><w:body><w:p><w:instrText>PAGE</w:instrText><w:r><w:t>kept</w:t></w:r></w:p></w:body></w:document>"#,
            NS
        );
        assert_eq!(parse_docx_xml(&xml).unwrap(), "kept\n");
    }

    #[test]
    fn test_entity_references_are_resolved() {
        let xml = format!(
            r#"<w:document {}><w:body><w:p><w:r><w:t>Fish &amp; chips &#169; &#x41;&lt;</w:t></w:r></w:p></w:body></w:document>"#,
            NS
        );
        assert_eq!(parse_docx_xml(&xml).unwrap(), "Fish & chips \u{a9} A<\n");
    }

    #[test]
    fn test_unknown_entity_is_an_error() {
        let xml = format!(
            r#"<w:document {}><w:body><w:p><w:r><w:t>broken &nbsp; text</w:t></w:r></w:p></w:body></w:document>"#,
            NS
        );
        match parse_docx_xml(&xml) {
            Err(ProcessError::DocxProcessing(message)) => assert!(message.contains("&nbsp;"), "{}", message),
            other => panic!("Expected DocxProcessing error, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_from_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("letter.docx");
        write_docx(&path, "<w:p><w:r><w:t>Dear reader</w:t></w:r></w:p>");

        let text = DocxExtractor.extract(&path).unwrap();
        assert_eq!(text.trim(), "Dear reader");
    }

    #[test]
    fn test_not_a_zip() {
        let temp = tempfile::NamedTempFile::with_suffix(".docx").unwrap();
        std::fs::write(temp.path(), b"plain text pretending").unwrap();
        assert!(matches!(
            DocxExtractor.extract(temp.path()),
            Err(ProcessError::DocxProcessing(_))
        ));
    }
}
