//! Workbook reading and editing.
//!
//! `.xlsx` files go through umya-spreadsheet, which keeps styles, formulas and
//! merged ranges. `.xls` files are read with calamine and `.csv` with the csv
//! crate; both only carry values. Every write produces an `.xlsx` file.

use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;

use calamine::{open_workbook_auto, Data, Reader};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use umya_spreadsheet::{Cell, Spreadsheet, Style, Worksheet};

use crate::error::ProcessError;
use crate::processor::{ensure_exists, DocumentFormat};
use crate::sanitize::redact_path;

/// Sheet name used for CSV input, which has no sheets.
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// Upper bound for a date serial (9999-12-31).
const MAX_DATE_SERIAL: f64 = 2_958_465.0;
/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
/// Largest sheet the xlsx format allows.
pub const MAX_ROWS: u32 = 1_048_576;
pub const MAX_COLUMNS: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    String,
    Number,
    Boolean,
    Date,
    Formula,
    Hyperlink,
    Error,
    Empty,
}

/// Style attributes that survive a read and can be applied on write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    /// ARGB hex, e.g. `FFFF0000`. Six-digit RGB is accepted on input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
}

impl CellStyle {
    fn is_empty(&self) -> bool {
        self == &CellStyle::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDescriptor {
    pub value: Value,
    pub address: String,
    pub row: u32,
    pub col: u32,
    #[serde(rename = "type")]
    pub kind: CellType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<CellStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetData {
    pub name: String,
    /// 1-based position in the workbook.
    pub id: usize,
    pub rows: Vec<Vec<CellDescriptor>>,
    pub merged_cells: Vec<String>,
    pub row_count: u32,
    pub column_count: u32,
}

/// Sheet dimensions without cell contents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetStats {
    pub name: String,
    pub row_count: u32,
    pub column_count: u32,
    pub merged_cells: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookMetadata {
    pub format: &'static str,
    pub sheet_count: usize,
    pub creator: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookData {
    pub sheets: Vec<SheetData>,
    pub metadata: WorkbookMetadata,
}

/// Cell data for `write` and `create`. A sheet is matched by `name`, then by
/// 1-based `id`, then by its position in the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<usize>,
    #[serde(default)]
    pub rows: Vec<Vec<CellInput>>,
    #[serde(default)]
    pub merged_cells: Vec<String>,
}

/// A bare JSON value, or an object with `value` and optional coordinates
/// and style. Coordinates default to the cell's position in `rows`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CellInput {
    Detailed(CellSpec),
    Bare(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSpec {
    #[serde(default)]
    pub row: Option<u32>,
    #[serde(default)]
    pub col: Option<u32>,
    pub value: Value,
    #[serde(default)]
    pub style: Option<CellStyle>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSummary {
    pub sheets_written: usize,
    pub cells_written: usize,
    pub size: u64,
}

// ============================================
// Read
// ============================================

pub fn read(path: &Path) -> Result<WorkbookData, ProcessError> {
    let _span = tracing::info_span!("processor.spreadsheet.read", file = %redact_path(path)).entered();

    ensure_exists(path)?;
    match DocumentFormat::from_path(path)? {
        DocumentFormat::Xlsx => read_xlsx(path),
        format @ (DocumentFormat::Xls | DocumentFormat::Csv) => read_values_only(path, format),
        other => Err(ProcessError::UnsupportedFormat(
            format!("{:?}", other).to_lowercase(),
        )),
    }
}

pub fn stats(path: &Path) -> Result<Vec<SheetStats>, ProcessError> {
    let _span = tracing::info_span!("processor.spreadsheet.stats", file = %redact_path(path)).entered();

    ensure_exists(path)?;
    match DocumentFormat::from_path(path)? {
        DocumentFormat::Xlsx => {
            let book = open_xlsx(path)?;
            Ok(book
                .get_sheet_collection()
                .iter()
                .map(|worksheet| {
                    let (column_count, row_count) = worksheet.get_highest_column_and_row();
                    SheetStats {
                        name: worksheet.get_name().to_string(),
                        row_count,
                        column_count,
                        merged_cells: worksheet.get_merge_cells().len(),
                    }
                })
                .collect())
        }
        format @ (DocumentFormat::Xls | DocumentFormat::Csv) => {
            Ok(read_values_only(path, format)?
                .sheets
                .into_iter()
                .map(|sheet| SheetStats {
                    name: sheet.name,
                    row_count: sheet.row_count,
                    column_count: sheet.column_count,
                    merged_cells: 0,
                })
                .collect())
        }
        other => Err(ProcessError::UnsupportedFormat(
            format!("{:?}", other).to_lowercase(),
        )),
    }
}

fn read_xlsx(path: &Path) -> Result<WorkbookData, ProcessError> {
    let book = open_xlsx(path)?;

    let sheets: Vec<SheetData> = book
        .get_sheet_collection()
        .iter()
        .enumerate()
        .map(|(index, worksheet)| describe_sheet(worksheet, index + 1))
        .collect();

    let properties = book.get_properties();
    let metadata = WorkbookMetadata {
        format: "xlsx",
        sheet_count: sheets.len(),
        creator: non_empty(properties.get_creator()),
        created: non_empty(properties.get_created()),
        modified: non_empty(properties.get_modified()),
    };

    Ok(WorkbookData { sheets, metadata })
}

/// Rows hold only the populated cells, in row then column order.
fn describe_sheet(worksheet: &Worksheet, id: usize) -> SheetData {
    let (max_col, max_row) = worksheet.get_highest_column_and_row();

    let mut cells: Vec<(u32, u32, &Cell)> = worksheet
        .get_cell_collection()
        .into_iter()
        .map(|cell| {
            let coordinate = cell.get_coordinate();
            (
                coordinate.get_row_num().to_owned(),
                coordinate.get_col_num().to_owned(),
                cell,
            )
        })
        .collect();
    cells.sort_unstable_by_key(|&(row, col, _)| (row, col));

    let rows = cells
        .chunk_by(|a, b| a.0 == b.0)
        .map(|same_row| {
            same_row
                .iter()
                .map(|&(row, col, cell)| describe_cell(cell, col, row))
                .collect()
        })
        .collect();

    SheetData {
        name: worksheet.get_name().to_string(),
        id,
        rows,
        merged_cells: merged_ranges(worksheet),
        row_count: max_row,
        column_count: max_col,
    }
}

fn merged_ranges(worksheet: &Worksheet) -> Vec<String> {
    worksheet
        .get_merge_cells()
        .iter()
        .map(|range| range.get_range())
        .collect()
}

fn describe_cell(cell: &Cell, col: u32, row: u32) -> CellDescriptor {
    let style = style_snapshot(cell.get_style());
    let number_format = style.as_ref().and_then(|s| s.number_format.as_deref());
    let raw = cell.get_value().to_string();

    let (value, mut kind, formula) = if cell.is_formula() {
        // The value is the result cached by the last application that saved the file.
        (scalar_from_text(&raw), CellType::Formula, Some(cell.get_formula().to_string()))
    } else if raw.is_empty() {
        (Value::Null, CellType::Empty, None)
    } else {
        match cell.get_data_type() {
            "b" => (
                Value::Bool(raw.eq_ignore_ascii_case("true") || raw == "1"),
                CellType::Boolean,
                None,
            ),
            "e" => (Value::String(raw), CellType::Error, None),
            "n" => {
                let number = cell.get_value_number().or_else(|| raw.parse().ok());
                match number {
                    Some(n) if number_format.is_some_and(is_date_format) => (
                        serial_to_iso(n)
                            .map(Value::String)
                            .unwrap_or_else(|| number_value(n)),
                        CellType::Date,
                        None,
                    ),
                    Some(n) => (number_value(n), CellType::Number, None),
                    None => (Value::String(raw), CellType::String, None),
                }
            }
            _ => (cell_text_to_json(&raw), CellType::String, None),
        }
    };

    let hyperlink = cell.get_hyperlink().map(|link| link.get_url().to_string());
    if hyperlink.is_some() && kind != CellType::Formula {
        kind = CellType::Hyperlink;
    }

    CellDescriptor {
        value,
        address: cell_address(col, row),
        row,
        col,
        kind,
        style,
        formula,
        hyperlink,
    }
}

fn style_snapshot(style: &Style) -> Option<CellStyle> {
    let mut snapshot = CellStyle::default();

    if let Some(font) = style.get_font() {
        snapshot.bold = font.get_bold().to_owned().then_some(true);
        snapshot.italic = font.get_italic().to_owned().then_some(true);
        snapshot.font_size = Some(font.get_size().to_owned());
        snapshot.font_color = non_empty(font.get_color().get_argb());
    }
    if let Some(color) = style.get_background_color() {
        snapshot.background_color = non_empty(color.get_argb());
    }
    if let Some(format) = style.get_number_format() {
        let code = format.get_format_code();
        if !code.eq_ignore_ascii_case("general") {
            snapshot.number_format = non_empty(code);
        }
    }

    (!snapshot.is_empty()).then_some(snapshot)
}

fn read_values_only(path: &Path, format: DocumentFormat) -> Result<WorkbookData, ProcessError> {
    let grids = read_value_grid(path)?;

    let sheets: Vec<SheetData> = grids
        .into_iter()
        .enumerate()
        .map(|(index, grid)| {
            let (first_row, first_col) = grid.origin;
            let column_count = grid
                .rows
                .iter()
                .map(|r| r.len() as u32)
                .max()
                .map_or(0, |width| width + first_col - 1);
            let row_count = match grid.rows.len() as u32 {
                0 => 0,
                height => height + first_row - 1,
            };

            let rows = grid
                .rows
                .into_iter()
                .enumerate()
                .map(|(r, cells)| {
                    cells
                        .into_iter()
                        .enumerate()
                        .filter(|(_, cell)| cell.kind != CellType::Empty)
                        .map(|(c, cell)| {
                            let row = first_row + r as u32;
                            let col = first_col + c as u32;
                            CellDescriptor {
                                value: cell.value,
                                address: cell_address(col, row),
                                row,
                                col,
                                kind: cell.kind,
                                style: None,
                                formula: None,
                                hyperlink: None,
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells.is_empty())
                .collect();

            SheetData {
                name: grid.name,
                id: index + 1,
                rows,
                merged_cells: Vec::new(),
                row_count,
                column_count,
            }
        })
        .collect();

    Ok(WorkbookData {
        metadata: WorkbookMetadata {
            format: match format {
                DocumentFormat::Csv => "csv",
                _ => "xls",
            },
            sheet_count: sheets.len(),
            creator: None,
            created: None,
            modified: None,
        },
        sheets,
    })
}

/// One sheet of values. `origin` is the 1-based (row, col) of `rows[0][0]`.
#[derive(Debug, Clone)]
pub(crate) struct SheetGrid {
    pub name: String,
    pub origin: (u32, u32),
    pub rows: Vec<Vec<GridCell>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GridCell {
    pub value: Value,
    pub kind: CellType,
}

/// Values of every sheet, without styles. Formula cells hold their cached
/// results and dates are ISO-8601 strings.
pub(crate) fn read_value_grid(path: &Path) -> Result<Vec<SheetGrid>, ProcessError> {
    ensure_exists(path)?;
    match DocumentFormat::from_path(path)? {
        DocumentFormat::Csv => read_csv_grid(path).map(|grid| vec![grid]),
        DocumentFormat::Xlsx | DocumentFormat::Xls => read_calamine_grid(path),
        other => Err(ProcessError::UnsupportedFormat(
            format!("{:?}", other).to_lowercase(),
        )),
    }
}

fn read_calamine_grid(path: &Path) -> Result<Vec<SheetGrid>, ProcessError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        ProcessError::SpreadsheetProcessing(format!("Failed to open workbook: {}", e))
    })?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut grids = Vec::with_capacity(sheet_names.len());
    for name in sheet_names {
        let range = workbook.worksheet_range(&name).map_err(|e| {
            ProcessError::SpreadsheetProcessing(format!("Failed to read sheet '{}': {}", name, e))
        })?;

        let origin = range
            .start()
            .map(|(row, col)| (row + 1, col + 1))
            .unwrap_or((1, 1));
        let rows = range
            .rows()
            .map(|row| row.iter().map(grid_cell).collect())
            .collect();

        grids.push(SheetGrid { name, origin, rows });
    }

    Ok(grids)
}

fn grid_cell(data: &Data) -> GridCell {
    let (value, kind) = match data {
        Data::Empty => (Value::Null, CellType::Empty),
        Data::String(s) if s.is_empty() => (Value::Null, CellType::Empty),
        Data::String(s) => (cell_text_to_json(s), CellType::String),
        Data::Int(i) => (Value::from(*i), CellType::Number),
        Data::Float(f) => (number_value(*f), CellType::Number),
        Data::Bool(b) => (Value::Bool(*b), CellType::Boolean),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            (
                serial_to_iso(serial)
                    .map(Value::String)
                    .unwrap_or_else(|| number_value(serial)),
                CellType::Date,
            )
        }
        Data::DateTimeIso(s) => (Value::String(s.clone()), CellType::Date),
        Data::DurationIso(s) => (Value::String(s.clone()), CellType::String),
        Data::Error(e) => (Value::String(e.to_string()), CellType::Error),
    };
    GridCell { value, kind }
}

fn read_csv_grid(path: &Path) -> Result<SheetGrid, ProcessError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_path(path)
        .map_err(|e| ProcessError::SpreadsheetProcessing(format!("Failed to open CSV: {}", e)))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            ProcessError::SpreadsheetProcessing(format!("Failed to parse CSV: {}", e))
        })?;
        rows.push(record.iter().map(csv_cell).collect());
    }

    Ok(SheetGrid {
        name: DEFAULT_SHEET_NAME.to_string(),
        origin: (1, 1),
        rows,
    })
}

fn csv_cell(field: &str) -> GridCell {
    if field.is_empty() {
        return GridCell {
            value: Value::Null,
            kind: CellType::Empty,
        };
    }
    if let Ok(i) = field.parse::<i64>() {
        return GridCell {
            value: Value::from(i),
            kind: CellType::Number,
        };
    }
    match field.parse::<f64>() {
        Ok(f) if f.is_finite() => GridCell {
            value: number_value(f),
            kind: CellType::Number,
        },
        _ => GridCell {
            value: cell_text_to_json(field),
            kind: CellType::String,
        },
    }
}

// ============================================
// Write / create
// ============================================

/// Applies `sheets` to a copy of the workbook at `input` and saves it as
/// `.xlsx` at `output`. The input file is left untouched.
pub fn write(
    input: &Path,
    sheets: &[SheetInput],
    output: &Path,
) -> Result<WriteSummary, ProcessError> {
    let _span = tracing::info_span!(
        "processor.spreadsheet.write",
        file = %redact_path(input),
        sheets = sheets.len()
    )
    .entered();

    ensure_exists(input)?;
    if sheets.is_empty() {
        return Err(ProcessError::InvalidInput(
            "No sheet data provided".to_string(),
        ));
    }

    let mut book = load_book(input)?;
    let mut summary = WriteSummary::default();
    for (index, sheet) in sheets.iter().enumerate() {
        let worksheet = find_sheet_mut(&mut book, sheet, index)?;
        summary.cells_written += apply_sheet(worksheet, sheet)?;
        summary.sheets_written += 1;
    }

    summary.size = save_book(&book, output)?;
    tracing::info!(cells = summary.cells_written, "Workbook written");
    Ok(summary)
}

/// Builds a new workbook from `sheets`. Unnamed sheets are called `SheetN`.
pub fn create(sheets: &[SheetInput], output: &Path) -> Result<WriteSummary, ProcessError> {
    let _span = tracing::info_span!("processor.spreadsheet.create", sheets = sheets.len()).entered();

    if sheets.is_empty() {
        return Err(ProcessError::InvalidInput(
            "At least one sheet is required".to_string(),
        ));
    }

    let mut book = umya_spreadsheet::new_file();
    let mut summary = WriteSummary::default();
    for (index, sheet) in sheets.iter().enumerate() {
        let name = sheet
            .name
            .clone()
            .unwrap_or_else(|| format!("Sheet{}", index + 1));
        let worksheet = add_sheet(&mut book, index, &name)?;
        summary.cells_written += apply_sheet(worksheet, sheet)?;
        summary.sheets_written += 1;
    }

    summary.size = save_book(&book, output)?;
    Ok(summary)
}

/// The first sheet renames the default one `new_file` starts with.
pub(crate) fn add_sheet<'a>(
    book: &'a mut Spreadsheet,
    index: usize,
    name: &str,
) -> Result<&'a mut Worksheet, ProcessError> {
    if index == 0 {
        let worksheet = book.get_sheet_mut(&0).ok_or_else(|| {
            ProcessError::SpreadsheetProcessing("New workbook has no default sheet".to_string())
        })?;
        worksheet.set_name(name);
        Ok(worksheet)
    } else {
        book.new_sheet(name).map_err(|e| {
            ProcessError::SpreadsheetProcessing(format!("Failed to add sheet '{}': {}", name, e))
        })
    }
}

fn find_sheet_mut<'a>(
    book: &'a mut Spreadsheet,
    sheet: &SheetInput,
    index: usize,
) -> Result<&'a mut Worksheet, ProcessError> {
    if let Some(name) = &sheet.name {
        return book
            .get_sheet_by_name_mut(name)
            .ok_or_else(|| ProcessError::SheetNotFound(name.clone()));
    }

    let id = sheet.id.unwrap_or(index + 1);
    let position = id
        .checked_sub(1)
        .ok_or_else(|| ProcessError::SheetNotFound(id.to_string()))?;
    book.get_sheet_mut(&position)
        .ok_or_else(|| ProcessError::SheetNotFound(id.to_string()))
}

static RE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{1,3}[1-9][0-9]*:[A-Z]{1,3}[1-9][0-9]*$").unwrap());

fn apply_sheet(worksheet: &mut Worksheet, sheet: &SheetInput) -> Result<usize, ProcessError> {
    let mut written = 0;

    for (r, row) in sheet.rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            let (row_num, col_num, value, style) = match cell {
                CellInput::Detailed(spec) => (
                    spec.row.unwrap_or(r as u32 + 1),
                    spec.col.unwrap_or(c as u32 + 1),
                    &spec.value,
                    spec.style.as_ref(),
                ),
                CellInput::Bare(value) => (r as u32 + 1, c as u32 + 1, value, None),
            };
            if row_num == 0 || col_num == 0 {
                return Err(ProcessError::InvalidInput(
                    "Row and column numbers start at 1".to_string(),
                ));
            }
            if row_num > MAX_ROWS || col_num > MAX_COLUMNS {
                return Err(ProcessError::InvalidInput(format!(
                    "Cell (row {}, column {}) is outside the sheet; the limit is {} rows and {} columns",
                    row_num, col_num, MAX_ROWS, MAX_COLUMNS
                )));
            }

            let target = worksheet.get_cell_mut((col_num, row_num));
            set_cell_value(target, value);
            if let Some(style) = style {
                apply_style(target.get_style_mut(), style)?;
            }
            written += 1;
        }
    }

    for range in &sheet.merged_cells {
        let range = range.to_ascii_uppercase();
        if !RE_RANGE.is_match(&range) {
            return Err(ProcessError::InvalidInput(format!(
                "Invalid merge range '{}'",
                range
            )));
        }
        worksheet.add_merge_cells(range);
    }

    Ok(written)
}

/// Objects and arrays are stored as their JSON text.
pub(crate) fn set_cell_value(cell: &mut Cell, value: &Value) {
    match value {
        Value::Null => {
            cell.set_value_string("");
        }
        Value::Bool(b) => {
            cell.set_value_bool(*b);
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) => {
                cell.set_value_number(f);
            }
            None => {
                cell.set_value_string(n.to_string());
            }
        },
        Value::String(s) => {
            cell.set_value_string(s.as_str());
        }
        Value::Array(_) | Value::Object(_) => {
            cell.set_value_string(value.to_string());
        }
    }
}

fn apply_style(style: &mut Style, input: &CellStyle) -> Result<(), ProcessError> {
    if let Some(bold) = input.bold {
        style.get_font_mut().set_bold(bold);
    }
    if let Some(italic) = input.italic {
        style.get_font_mut().set_italic(italic);
    }
    if let Some(size) = input.font_size {
        style.get_font_mut().set_size(size);
    }
    if let Some(color) = &input.font_color {
        style
            .get_font_mut()
            .get_color_mut()
            .set_argb(normalize_argb(color)?);
    }
    if let Some(color) = &input.background_color {
        style.set_background_color(normalize_argb(color)?);
    }
    if let Some(format) = &input.number_format {
        style
            .get_number_format_mut()
            .set_format_code(format.as_str());
    }
    Ok(())
}

/// Accepts `RRGGBB` or `AARRGGBB`, with or without a leading `#`.
pub(crate) fn normalize_argb(color: &str) -> Result<String, ProcessError> {
    let hex = color.trim().trim_start_matches('#').to_ascii_uppercase();
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProcessError::InvalidInput(format!("Invalid color '{}'", color)));
    }
    match hex.len() {
        6 => Ok(format!("FF{}", hex)),
        8 => Ok(hex),
        _ => Err(ProcessError::InvalidInput(format!("Invalid color '{}'", color))),
    }
}

/// Opens any supported input as an editable workbook. Values-only formats
/// are copied cell by cell into a fresh one.
fn load_book(path: &Path) -> Result<Spreadsheet, ProcessError> {
    match DocumentFormat::from_path(path)? {
        DocumentFormat::Xlsx => open_xlsx(path),
        DocumentFormat::Xls | DocumentFormat::Csv => {
            let grids = read_value_grid(path)?;
            let mut book = umya_spreadsheet::new_file();
            for (index, grid) in grids.iter().enumerate() {
                let worksheet = add_sheet(&mut book, index, &grid.name)?;
                let (first_row, first_col) = grid.origin;
                for (r, row) in grid.rows.iter().enumerate() {
                    for (c, cell) in row.iter().enumerate() {
                        if cell.kind == CellType::Empty {
                            continue;
                        }
                        let target =
                            worksheet.get_cell_mut((first_col + c as u32, first_row + r as u32));
                        set_cell_value(target, &cell.value);
                    }
                }
            }
            Ok(book)
        }
        other => Err(ProcessError::UnsupportedFormat(
            format!("{:?}", other).to_lowercase(),
        )),
    }
}

fn open_xlsx(path: &Path) -> Result<Spreadsheet, ProcessError> {
    let file = std::fs::File::open(path).map_err(|e| ProcessError::ReadDocument {
        path: path.to_path_buf(),
        source: e,
    })?;
    umya_spreadsheet::reader::xlsx::read_reader(file, true).map_err(|e| {
        ProcessError::SpreadsheetProcessing(format!(
            "Failed to read {}: {}",
            redact_path(path),
            e
        ))
    })
}

pub(crate) fn save_book(book: &Spreadsheet, path: &Path) -> Result<u64, ProcessError> {
    let mut buffer = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(book, &mut buffer).map_err(|e| {
        ProcessError::SpreadsheetProcessing(format!("Failed to serialize workbook: {}", e))
    })?;

    let bytes = buffer.into_inner();
    std::fs::write(path, &bytes).map_err(|e| ProcessError::WriteDocument {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(bytes.len() as u64)
}

// ============================================
// Value helpers
// ============================================

/// `1 -> "A"`, `27 -> "AA"`.
pub fn column_letter(col: u32) -> String {
    let mut letters = Vec::new();
    let mut n = col;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

pub fn cell_address(col: u32, row: u32) -> String {
    format!("{}{}", column_letter(col), row)
}

/// Text that looks like a JSON object or array is parsed; anything else,
/// including malformed JSON, stays a string.
pub fn cell_text_to_json(text: &str) -> Value {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(text) {
            return value;
        }
    }
    Value::String(text.to_string())
}

/// Integral values become JSON integers.
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn scalar_from_text(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    match text.parse::<f64>() {
        Ok(n) if n.is_finite() => number_value(n),
        _ => match text {
            "TRUE" => Value::Bool(true),
            "FALSE" => Value::Bool(false),
            _ => cell_text_to_json(text),
        },
    }
}

static RE_FORMAT_LITERALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|\[[^\]]*\]|\\."#).unwrap());

/// A number format displays a date or time when, outside quoted literals and
/// bracketed sections, it contains a date or time token.
pub fn is_date_format(code: &str) -> bool {
    if code.eq_ignore_ascii_case("general") {
        return false;
    }
    let stripped = RE_FORMAT_LITERALS.replace_all(code, "");
    stripped
        .chars()
        .any(|c| matches!(c.to_ascii_lowercase(), 'y' | 'd' | 'm' | 'h' | 's'))
}

/// Converts a 1900-system date serial to `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn serial_to_iso(serial: f64) -> Option<String> {
    if !serial.is_finite() || !(0.0..=MAX_DATE_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    let datetime = epoch.checked_add_signed(chrono::Duration::milliseconds(millis))?;
    Some(datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
