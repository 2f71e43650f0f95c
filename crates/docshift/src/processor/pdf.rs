//! PDF operations on top of lopdf: page assembly (merge, split, extract),
//! re-serialization, watermarking, text-to-PDF and metadata.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};

use crate::error::ProcessError;
use crate::processor::text::{escape_pdf_string, render_text_pdf, PAGE_HEIGHT, PAGE_WIDTH};
use crate::processor::{ensure_exists, DocumentFormat, ExtractorRegistry, TextExtractor};
use crate::sanitize::redact_path;

pub const MIN_MERGE_INPUTS: usize = 2;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];
const MAX_TREE_DEPTH: usize = 32;

const WATERMARK_FONT: &str = "FWm";
const WATERMARK_STATE: &str = "GSWm";
/// Approximate Helvetica-Bold glyph width as a fraction of the font size.
const WATERMARK_CHAR_WIDTH: f32 = 0.55;
/// Distance from the page edge for top and bottom watermarks.
const EDGE_OFFSET: f32 = 50.0;

/// A single PDF written by an operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfOutput {
    #[serde(skip)]
    pub path: PathBuf,
    pub page_count: usize,
    pub size: u64,
}

/// One file produced by a split.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPart {
    #[serde(skip)]
    pub path: PathBuf,
    pub file_name: String,
    pub start_page: u32,
    pub end_page: u32,
    pub page_count: usize,
    pub size: u64,
}

/// Inclusive, 1-indexed page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Extreme,
    #[default]
    Recommended,
    Low,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 3] = [Self::Extreme, Self::Recommended, Self::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extreme => "extreme",
            Self::Recommended => "recommended",
            Self::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == value)
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionReport {
    #[serde(skip)]
    pub path: PathBuf,
    pub level: CompressionLevel,
    pub original_size: u64,
    pub compressed_size: u64,
    pub saved_bytes: u64,
    /// Formatted as `"12.34%"`, never negative.
    pub percentage: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkPosition {
    #[default]
    Center,
    Diagonal,
    Top,
    Bottom,
}

impl WatermarkPosition {
    pub const ALL: [WatermarkPosition; 4] = [Self::Center, Self::Diagonal, Self::Top, Self::Bottom];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Diagonal => "diagonal",
            Self::Top => "top",
            Self::Bottom => "bottom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkOptions {
    pub opacity: f32,
    pub font_size: f32,
    /// Degrees; only applied to diagonal watermarks.
    pub rotation: f32,
    /// RGB components in `[0, 1]`.
    pub color: [f32; 3],
    pub position: WatermarkPosition,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            opacity: 0.3,
            font_size: 48.0,
            rotation: -45.0,
            color: [0.5, 0.5, 0.5],
            position: WatermarkPosition::Center,
        }
    }
}

impl WatermarkOptions {
    pub fn validate(&self) -> Result<(), ProcessError> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ProcessError::InvalidInput(
                "Opacity must be between 0 and 1".to_string(),
            ));
        }
        if !(1.0..=500.0).contains(&self.font_size) {
            return Err(ProcessError::InvalidInput(
                "Font size must be between 1 and 500".to_string(),
            ));
        }
        if !(-360.0..=360.0).contains(&self.rotation) {
            return Err(ProcessError::InvalidInput(
                "Rotation must be between -360 and 360 degrees".to_string(),
            ));
        }
        if self.color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ProcessError::InvalidInput(
                "Color components must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses `"r,g,b"` with each component in `[0, 1]`.
pub fn parse_color(value: &str) -> Result<[f32; 3], ProcessError> {
    let invalid = || {
        ProcessError::InvalidInput(format!(
            "Invalid color '{}'. Expected three comma-separated numbers between 0 and 1",
            value
        ))
    };

    let parts: Vec<f32> = value
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;

    match parts.as_slice() {
        [r, g, b] if parts.iter().all(|c| (0.0..=1.0).contains(c)) => Ok([*r, *g, *b]),
        _ => Err(invalid()),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfInfo {
    pub page_count: usize,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub file_size: u64,
    pub version: String,
}

// ============================================
// Page assembly operations
// ============================================

/// Concatenates the pages of every input, in input order.
pub fn merge(inputs: &[PathBuf], output: &Path) -> Result<PdfOutput, ProcessError> {
    let _span = tracing::info_span!("processor.pdf.merge", files = inputs.len()).entered();

    if inputs.len() < MIN_MERGE_INPUTS {
        return Err(ProcessError::InvalidInput(format!(
            "At least {} PDF files are required for merging",
            MIN_MERGE_INPUTS
        )));
    }
    for input in inputs {
        ensure_exists(input)?;
    }

    let mut sources = Vec::with_capacity(inputs.len());
    let mut selection = Vec::new();
    for (index, input) in inputs.iter().enumerate() {
        let (doc, _) = load(input)?;
        selection.extend(doc.get_pages().keys().map(|&number| (index, number)));
        sources.push(doc);
    }

    let mut merged = assemble(sources, &selection)?;
    let size = save(&mut merged, output)?;
    tracing::info!(pages = selection.len(), size, "Merged PDFs");

    Ok(PdfOutput {
        path: output.to_path_buf(),
        page_count: selection.len(),
        size,
    })
}

/// Writes one file per page into `output_dir`: `page_001.pdf`, `page_002.pdf`, ...
pub fn split_to_pages(input: &Path, output_dir: &Path) -> Result<Vec<SplitPart>, ProcessError> {
    let _span =
        tracing::info_span!("processor.pdf.split_pages", file = %redact_path(input)).entered();

    let (doc, _) = load(input)?;
    let total = non_empty_page_total(&doc)?;

    (1..=total)
        .map(|page| {
            write_part(
                &doc,
                page,
                page,
                output_dir,
                format!("page_{:03}.pdf", page),
            )
        })
        .collect()
}

/// Writes one file per range. All ranges are validated before anything is written.
pub fn split_by_range(
    input: &Path,
    ranges: &[PageRange],
    output_dir: &Path,
) -> Result<Vec<SplitPart>, ProcessError> {
    let _span = tracing::info_span!(
        "processor.pdf.split_range",
        file = %redact_path(input),
        ranges = ranges.len()
    )
    .entered();

    ensure_exists(input)?;
    if ranges.is_empty() {
        return Err(ProcessError::InvalidInput(
            "At least one page range is required".to_string(),
        ));
    }

    let (doc, _) = load(input)?;
    let total = page_total(&doc);
    validate_ranges(ranges, total)?;

    let mut used_names = HashSet::new();
    let mut parts = Vec::with_capacity(ranges.len());
    for (index, range) in ranges.iter().enumerate() {
        let mut name = format!("pages_{:03}-{:03}.pdf", range.start, range.end);
        if !used_names.insert(name.clone()) {
            name = format!("pages_{:03}-{:03}_{}.pdf", range.start, range.end, index + 1);
            used_names.insert(name.clone());
        }
        parts.push(write_part(&doc, range.start, range.end, output_dir, name)?);
    }

    Ok(parts)
}

/// Writes consecutive chunks of `pages_per_file` pages as `part_001.pdf`, ...
/// The last chunk holds the remainder.
pub fn split_by_fixed(
    input: &Path,
    pages_per_file: u32,
    output_dir: &Path,
) -> Result<Vec<SplitPart>, ProcessError> {
    let _span = tracing::info_span!(
        "processor.pdf.split_fixed",
        file = %redact_path(input),
        pages_per_file
    )
    .entered();

    ensure_exists(input)?;
    if pages_per_file == 0 {
        return Err(ProcessError::InvalidInput(
            "Pages per file must be at least 1".to_string(),
        ));
    }

    let (doc, _) = load(input)?;
    let total = non_empty_page_total(&doc)?;

    (0..total.div_ceil(pages_per_file))
        .map(|part| {
            let start = part * pages_per_file + 1;
            let end = (start + pages_per_file - 1).min(total);
            write_part(
                &doc,
                start,
                end,
                output_dir,
                format!("part_{:03}.pdf", part + 1),
            )
        })
        .collect()
}

/// Copies the given pages, in the given order, into one file. A page may
/// appear more than once.
pub fn extract_pages(
    input: &Path,
    pages: &[u32],
    output: &Path,
) -> Result<PdfOutput, ProcessError> {
    let _span = tracing::info_span!(
        "processor.pdf.extract",
        file = %redact_path(input),
        pages = pages.len()
    )
    .entered();

    ensure_exists(input)?;
    if pages.is_empty() {
        return Err(ProcessError::InvalidInput(
            "At least one page number is required".to_string(),
        ));
    }

    let (doc, _) = load(input)?;
    let total = page_total(&doc);

    let invalid: Vec<String> = pages
        .iter()
        .filter(|&&n| n < 1 || n > total)
        .map(|n| n.to_string())
        .collect();
    if !invalid.is_empty() {
        return Err(ProcessError::InvalidInput(format!(
            "Invalid page numbers: {}. Document has {} pages",
            invalid.join(", "),
            total
        )));
    }

    let selection: Vec<(usize, u32)> = pages.iter().map(|&n| (0, n)).collect();
    let mut extracted = assemble(vec![doc], &selection)?;
    let size = save(&mut extracted, output)?;

    Ok(PdfOutput {
        path: output.to_path_buf(),
        page_count: pages.len(),
        size,
    })
}

fn validate_ranges(ranges: &[PageRange], total: u32) -> Result<(), ProcessError> {
    for range in ranges {
        if range.start < 1 {
            return Err(ProcessError::InvalidInput(format!(
                "Invalid range {}-{}: start page must be at least 1 (document has {} pages)",
                range.start, range.end, total
            )));
        }
        if range.end > total {
            return Err(ProcessError::InvalidInput(format!(
                "Invalid range {}-{}: end page exceeds total pages ({})",
                range.start, range.end, total
            )));
        }
        if range.start > range.end {
            return Err(ProcessError::InvalidInput(format!(
                "Invalid range {}-{}: start page is greater than end page (document has {} pages)",
                range.start, range.end, total
            )));
        }
    }
    Ok(())
}

fn write_part(
    doc: &Document,
    start: u32,
    end: u32,
    output_dir: &Path,
    file_name: String,
) -> Result<SplitPart, ProcessError> {
    let selection: Vec<(usize, u32)> = (start..=end).map(|n| (0, n)).collect();
    let mut part = assemble(vec![doc.clone()], &selection)?;
    let path = output_dir.join(&file_name);
    let size = save(&mut part, &path)?;

    Ok(SplitPart {
        path,
        file_name,
        start_page: start,
        end_page: end,
        page_count: selection.len(),
        size,
    })
}

/// Builds a new document from `(source index, page number)` pairs.
///
/// Every source is renumbered past the objects already taken, its page tree
/// nodes are dropped, and the selected pages are hung under a fresh `Pages`
/// node. Attributes a page inherited from the old tree are copied onto the
/// page first. Selecting a page twice clones its dictionary; content streams
/// stay shared.
fn assemble(sources: Vec<Document>, selection: &[(usize, u32)]) -> Result<Document, ProcessError> {
    let mut out = Document::with_version("1.5");
    let mut page_maps: Vec<BTreeMap<u32, ObjectId>> = Vec::with_capacity(sources.len());

    for mut source in sources {
        source.renumber_objects_with(out.max_id + 1);
        out.max_id = source
            .objects
            .keys()
            .map(|(id, _)| *id)
            .max()
            .unwrap_or(0)
            .max(out.max_id);
        if source.version > out.version {
            out.version = source.version.clone();
        }

        let pages = source.get_pages();
        for &page_id in pages.values() {
            let inherited_values: Vec<(&[u8], Object)> = INHERITABLE
                .iter()
                .filter_map(|key| inherited(&source, page_id, key).map(|value| (*key, value)))
                .collect();
            if let Ok(page) = source.get_dictionary_mut(page_id) {
                for (key, value) in inherited_values {
                    page.set(key.to_vec(), value);
                }
                if !page.has(b"MediaBox") {
                    page.set("MediaBox", letter_box());
                }
            }
        }

        for (id, object) in source.objects {
            if !is_tree_node(&object) {
                out.objects.insert(id, object);
            }
        }
        page_maps.push(pages);
    }

    let pages_id = out.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(selection.len());
    let mut placed = HashSet::new();

    for &(source, number) in selection {
        let original = page_maps
            .get(source)
            .and_then(|pages| pages.get(&number))
            .copied()
            .ok_or_else(|| ProcessError::PdfProcessing(format!("Page {} not found", number)))?;

        let page_id = if placed.insert(original) {
            original
        } else {
            let copy = out.get_object(original)?.clone();
            out.add_object(copy)
        };

        out.get_dictionary_mut(page_id)?.set("Parent", pages_id);
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    out.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = out.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    out.trailer.set("Root", catalog_id);

    out.prune_objects();
    out.renumber_objects();
    Ok(out)
}

fn is_tree_node(object: &Object) -> bool {
    let kind = object
        .as_dict()
        .ok()
        .and_then(|dict| dict.get(b"Type").ok())
        .and_then(|t| t.as_name().ok());
    kind == Some(b"Catalog".as_slice()) || kind == Some(b"Pages".as_slice())
}

/// Looks `key` up on the page, then on each ancestor.
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn deref<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn letter_box() -> Object {
    Object::Array(vec![
        0.into(),
        0.into(),
        PAGE_WIDTH.into(),
        PAGE_HEIGHT.into(),
    ])
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// `(llx, lly, width, height)` of the page's MediaBox, Letter when absent.
fn page_box(doc: &Document, page_id: ObjectId) -> (f32, f32, f32, f32) {
    let media_box = inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| deref(doc, &obj).and_then(|o| o.as_array().ok()).cloned())
        .and_then(|items| {
            let values: Vec<f32> = items.iter().filter_map(number).collect();
            match values.as_slice() {
                [llx, lly, urx, ury] => Some((*llx, *lly, urx - llx, ury - lly)),
                _ => None,
            }
        });
    media_box.unwrap_or((0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT))
}

// ============================================
// Whole-document operations
// ============================================

/// Best-effort re-serialization: drops unreachable objects and empty streams,
/// then compresses the remaining streams. Every level does the same work.
pub fn compress(
    input: &Path,
    level: CompressionLevel,
    output: &Path,
) -> Result<CompressionReport, ProcessError> {
    let _span = tracing::info_span!(
        "processor.pdf.compress",
        file = %redact_path(input),
        level = %level
    )
    .entered();

    let (mut doc, original_size) = load(input)?;

    doc.prune_objects();
    doc.delete_zero_length_streams();
    doc.renumber_objects();
    doc.compress();

    let compressed_size = save(&mut doc, output)?;
    let saved_bytes = original_size.saturating_sub(compressed_size);
    let percentage = savings_percentage(original_size, saved_bytes);
    tracing::info!(original_size, compressed_size, %percentage, "Compressed PDF");

    Ok(CompressionReport {
        path: output.to_path_buf(),
        level,
        original_size,
        compressed_size,
        saved_bytes,
        percentage,
    })
}

fn savings_percentage(original_size: u64, saved_bytes: u64) -> String {
    if original_size == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", saved_bytes as f64 * 100.0 / original_size as f64)
}

/// Stamps `text` onto every page. The original page content is wrapped in
/// `q`/`Q` so its graphics state cannot leak into the overlay.
pub fn add_watermark(
    input: &Path,
    text: &str,
    options: &WatermarkOptions,
    output: &Path,
) -> Result<PdfOutput, ProcessError> {
    let _span = tracing::info_span!(
        "processor.pdf.watermark",
        file = %redact_path(input),
        position = options.position.as_str()
    )
    .entered();

    if text.trim().is_empty() {
        return Err(ProcessError::InvalidInput(
            "Watermark text is required".to_string(),
        ));
    }
    options.validate()?;

    let (mut doc, _) = load(input)?;

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let state_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => options.opacity,
        "CA" => options.opacity,
    });

    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for &page_id in &page_ids {
        let (llx, lly, width, height) = page_box(&doc, page_id);
        let overlay = watermark_content(text, options, llx, lly, width, height);

        let mut contents = vec![Object::Reference(
            doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec())),
        )];
        contents.extend(page_contents(&doc, page_id));
        contents.push(Object::Reference(
            doc.add_object(Stream::new(dictionary! {}, overlay.into_bytes())),
        ));

        let resources = watermark_resources(&doc, page_id, font_id, state_id);
        let page = doc.get_dictionary_mut(page_id)?;
        page.set("Contents", contents);
        page.set("Resources", resources);
    }

    let size = save(&mut doc, output)?;
    Ok(PdfOutput {
        path: output.to_path_buf(),
        page_count: page_ids.len(),
        size,
    })
}

fn page_contents(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let contents = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Contents").ok());

    match contents {
        Some(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => vec![Object::Reference(*id)],
            Err(_) => Vec::new(),
        },
        Some(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// The page's effective resources, copied inline, plus the watermark font
/// and graphics state.
fn watermark_resources(
    doc: &Document,
    page_id: ObjectId,
    font_id: ObjectId,
    state_id: ObjectId,
) -> Dictionary {
    let mut resources = inherited(doc, page_id, b"Resources")
        .and_then(|obj| deref(doc, &obj).and_then(|o| o.as_dict().ok()).cloned())
        .unwrap_or_else(Dictionary::new);

    let mut fonts = sub_dictionary(doc, &resources, b"Font");
    fonts.set(WATERMARK_FONT, font_id);
    resources.set("Font", fonts);

    let mut states = sub_dictionary(doc, &resources, b"ExtGState");
    states.set(WATERMARK_STATE, state_id);
    resources.set("ExtGState", states);

    resources
}

fn sub_dictionary(doc: &Document, parent: &Dictionary, key: &[u8]) -> Dictionary {
    parent
        .get(key)
        .ok()
        .and_then(|obj| deref(doc, obj))
        .and_then(|obj| obj.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new)
}

fn watermark_content(
    text: &str,
    options: &WatermarkOptions,
    llx: f32,
    lly: f32,
    width: f32,
    height: f32,
) -> String {
    let size = options.font_size;
    let text_width = text.chars().count() as f32 * WATERMARK_CHAR_WIDTH * size;
    let centered_x = llx + (width - text_width) / 2.0;

    let placement = match options.position {
        WatermarkPosition::Center => {
            format!("1 0 0 1 {:.2} {:.2} Tm", centered_x, lly + height / 2.0)
        }
        WatermarkPosition::Top => format!(
            "1 0 0 1 {:.2} {:.2} Tm",
            centered_x,
            lly + height - EDGE_OFFSET
        ),
        WatermarkPosition::Bottom => {
            format!("1 0 0 1 {:.2} {:.2} Tm", centered_x, lly + EDGE_OFFSET)
        }
        WatermarkPosition::Diagonal => {
            let (sin, cos) = options.rotation.to_radians().sin_cos();
            format!(
                "{:.4} {:.4} {:.4} {:.4} {:.2} {:.2} Tm {:.2} {:.2} Td",
                cos,
                sin,
                -sin,
                cos,
                llx + width / 2.0,
                lly + height / 2.0,
                -text_width / 2.0,
                -size / 3.0
            )
        }
    };

    let [r, g, b] = options.color;
    format!(
        "Q\nq\n/{} gs\n{:.3} {:.3} {:.3} rg\nBT\n/{} {:.1} Tf\n{}\n({}) Tj\nET\nQ\n",
        WATERMARK_STATE,
        r,
        g,
        b,
        WATERMARK_FONT,
        size,
        placement,
        escape_pdf_string(text)
    )
}

// ============================================
// Conversion and metadata
// ============================================

/// Reads the text layer of a PDF, one line block per page. Pages whose
/// content streams cannot be decoded are skipped.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String, ProcessError> {
        let (doc, _) = load(path)?;

        let mut text = String::new();
        for (page_number, _) in doc.get_pages() {
            match doc.extract_text(&[page_number]) {
                Ok(page_text) => {
                    text.push_str(page_text.trim_end());
                    text.push('\n');
                }
                Err(e) => {
                    tracing::warn!(page = page_number, error = %e, "Skipping page without readable text");
                }
            }
        }

        Ok(text)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pdf)
    }
}

/// Re-flows the text of a `.docx` file into a PDF. Formatting is dropped.
pub fn docx_to_pdf(input: &Path, output: &Path) -> Result<PdfOutput, ProcessError> {
    expect_format(input, DocumentFormat::Docx)?;
    document_to_pdf(input, output)
}

pub fn text_to_pdf(input: &Path, output: &Path) -> Result<PdfOutput, ProcessError> {
    expect_format(input, DocumentFormat::Text)?;
    document_to_pdf(input, output)
}

/// Converts any format the extractor registry can read.
pub fn document_to_pdf(input: &Path, output: &Path) -> Result<PdfOutput, ProcessError> {
    let _span =
        tracing::info_span!("processor.pdf.from_document", file = %redact_path(input)).entered();

    let text = ExtractorRegistry::new().extract(input)?;
    let mut doc = render_text_pdf(&text)?;
    let page_count = doc.get_pages().len();
    let size = save(&mut doc, output)?;

    Ok(PdfOutput {
        path: output.to_path_buf(),
        page_count,
        size,
    })
}

fn expect_format(input: &Path, expected: DocumentFormat) -> Result<(), ProcessError> {
    ensure_exists(input)?;
    let format = DocumentFormat::from_path(input)?;
    if format != expected {
        return Err(ProcessError::UnsupportedFormat(
            format!("{:?}", format).to_lowercase(),
        ));
    }
    Ok(())
}

pub fn get_info(input: &Path) -> Result<PdfInfo, ProcessError> {
    let _span = tracing::info_span!("processor.pdf.info", file = %redact_path(input)).entered();

    let (doc, file_size) = load(input)?;
    let pages = doc.get_pages();
    let (width, height) = match pages.values().next() {
        Some(&first) => {
            let (_, _, w, h) = page_box(&doc, first);
            (Some(w), Some(h))
        }
        None => (None, None),
    };

    let info = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| deref(&doc, obj))
        .and_then(|obj| obj.as_dict().ok());
    let field = |key: &[u8]| -> Option<String> {
        match info?.get(key).ok().and_then(|obj| deref(&doc, obj))? {
            Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
            _ => None,
        }
    };

    Ok(PdfInfo {
        page_count: pages.len(),
        width,
        height,
        title: field(b"Title"),
        author: field(b"Author"),
        subject: field(b"Subject"),
        creator: field(b"Creator"),
        producer: field(b"Producer"),
        file_size,
        version: doc.version.clone(),
    })
}

/// Text strings are UTF-16BE when they start with a byte order mark and
/// single-byte otherwise.
fn decode_pdf_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Rasterizing pages needs an external renderer this service does not ship.
pub fn pdf_to_images(input: &Path) -> Result<Vec<PathBuf>, ProcessError> {
    ensure_exists(input)?;
    Err(ProcessError::FeatureUnavailable {
        feature: "PDF to image conversion",
        requires: "an external rasterizer such as poppler (pdftoppm) or ImageMagick",
    })
}

// ============================================
// Load / save
// ============================================

fn load(path: &Path) -> Result<(Document, u64), ProcessError> {
    ensure_exists(path)?;
    let bytes = std::fs::read(path).map_err(|e| ProcessError::ReadDocument {
        path: path.to_path_buf(),
        source: e,
    })?;

    let doc = Document::load_mem(&bytes).map_err(|e| {
        ProcessError::PdfProcessing(format!("Failed to load {}: {}", redact_path(path), e))
    })?;
    Ok((doc, bytes.len() as u64))
}

fn save(doc: &mut Document, path: &Path) -> Result<u64, ProcessError> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to serialize PDF: {}", e)))?;
    std::fs::write(path, &bytes).map_err(|e| ProcessError::WriteDocument {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(bytes.len() as u64)
}

fn page_total(doc: &Document) -> u32 {
    doc.get_pages().len() as u32
}

fn non_empty_page_total(doc: &Document) -> Result<u32, ProcessError> {
    match page_total(doc) {
        0 => Err(ProcessError::PdfProcessing("PDF has no pages".to_string())),
        total => Ok(total),
    }
}
