use std::path::Path;

use lopdf::{dictionary, Document, Object, Stream};

use crate::error::ProcessError;
use crate::processor::{DocumentFormat, TextExtractor};

/// US Letter, in points.
pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;
pub const MARGIN: f32 = 72.0;

const FONT_SIZE: f32 = 12.0;
const LEADING: f32 = 14.4;
/// Average Helvetica glyph width as a fraction of the font size.
const AVG_CHAR_WIDTH: f32 = 0.5;

pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, ProcessError> {
        let bytes = std::fs::read(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Text)
    }
}

/// Lays plain text out on Letter pages with 72-point margins, wrapping long
/// lines at word boundaries. Empty input yields one blank page.
pub fn render_text_pdf(text: &str) -> Result<Document, ProcessError> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let max_chars = ((PAGE_WIDTH - 2.0 * MARGIN) / (FONT_SIZE * AVG_CHAR_WIDTH)) as usize;
    let lines_per_page = ((PAGE_HEIGHT - 2.0 * MARGIN) / LEADING + 1e-3) as usize;

    let lines = wrap_text(text, max_chars);
    let mut page_ids = Vec::new();

    for chunk in paginate(&lines, lines_per_page) {
        let content = format_text_for_pdf(chunk);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}

fn paginate(lines: &[String], per_page: usize) -> Vec<&[String]> {
    if lines.is_empty() {
        return vec![&lines[..0]];
    }
    lines.chunks(per_page.max(1)).collect()
}

/// Greedy word wrap. Words longer than a line are hard-split.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();

    for raw in text.lines() {
        let raw = raw.replace('\t', "    ");
        if raw.trim().is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current = String::new();
        let mut current_len = 0;
        for word in raw.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            if word.is_empty() {
                continue;
            }

            let needed = if current_len == 0 {
                word.len()
            } else {
                current_len + 1 + word.len()
            };
            if needed > max_chars {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(word.iter());
            current_len += word.len();
        }
        if current_len > 0 {
            lines.push(current);
        }
    }

    lines
}

fn format_text_for_pdf(lines: &[String]) -> String {
    let mut content = String::new();
    content.push_str("BT\n");
    content.push_str(&format!("/F1 {} Tf\n", FONT_SIZE));
    content.push_str(&format!("{} {} Td\n", MARGIN, PAGE_HEIGHT - MARGIN - FONT_SIZE));
    content.push_str(&format!("{} TL\n", LEADING));

    for line in lines {
        content.push_str(&format!("({}) Tj T*\n", escape_pdf_string(line)));
    }

    content.push_str("ET\n");
    content
}

/// Escapes text for a PDF literal string shown with a WinAnsi font.
/// Latin-1 characters become octal escapes; anything else becomes `?`.
pub fn escape_pdf_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\\' => out.push_str("\\\\"),
            c if c.is_ascii() && !c.is_control() => out.push(c),
            c if ('\u{a0}'..='\u{ff}').contains(&c) => {
                out.push_str(&format!("\\{:03o}", c as u32));
            }
            c if c.is_control() => out.push(' '),
            _ => out.push('?'),
        }
    }
    out
}
