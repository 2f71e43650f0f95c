//! JSON <-> workbook conversion.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use umya_spreadsheet::{Pane, PaneStateValues, PaneValues, SheetView, Worksheet};

use crate::error::ProcessError;
use crate::processor::spreadsheet::{
    add_sheet, column_letter, read_value_grid, save_book, set_cell_value, SheetGrid,
};
use crate::sanitize::redact_path;

pub const DEFAULT_SHEET_NAME: &str = "Sheet1";
pub const MAX_COLUMN_WIDTH: f64 = 50.0;
const HEADER_FILL: &str = "FFD3D3D3";
/// Excel limit on sheet name length.
const MAX_SHEET_NAME_LEN: usize = 31;

/// The two JSON layouts `json_to_excel` accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonShape {
    /// A top-level array: one sheet.
    Records(Vec<Map<String, Value>>),
    /// A top-level object: one sheet per key holding an array.
    Sheets(Vec<(String, Vec<Map<String, Value>>)>),
}

impl JsonShape {
    /// Array elements that are not objects become `{"value": element}`.
    /// Object keys whose value is not an array are ignored.
    pub fn from_value(value: &Value) -> Result<Self, ProcessError> {
        match value {
            Value::Array(items) => Ok(Self::Records(to_records(items))),
            Value::Object(map) => {
                let sheets: Vec<_> = map
                    .iter()
                    .filter_map(|(name, v)| match v {
                        Value::Array(items) => Some((name.clone(), to_records(items))),
                        _ => None,
                    })
                    .collect();
                if sheets.is_empty() {
                    return Err(ProcessError::InvalidInput(
                        "JSON object contains no arrays to convert".to_string(),
                    ));
                }
                Ok(Self::Sheets(sheets))
            }
            _ => Err(ProcessError::InvalidInput(
                "JSON data must be an array of records or an object of arrays".to_string(),
            )),
        }
    }

    fn into_sheets(self) -> Vec<(String, Vec<Map<String, Value>>)> {
        match self {
            Self::Records(records) => vec![(DEFAULT_SHEET_NAME.to_string(), records)],
            Self::Sheets(sheets) => sheets,
        }
    }
}

fn to_records(items: &[Value]) -> Vec<Map<String, Value>> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        })
        .collect()
}

/// Column layout of one sheet, taken from the first record's keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSchema {
    pub headers: Vec<String>,
}

impl SheetSchema {
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        Self {
            headers: records
                .first()
                .map(|first| first.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSummary {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonToExcelSummary {
    pub sheets: Vec<SheetSummary>,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcelToJsonResult {
    pub data: Value,
    pub sheet_count: usize,
    pub row_count: usize,
}

pub fn json_to_excel(data: &Value, output: &Path) -> Result<JsonToExcelSummary, ProcessError> {
    let _span = tracing::info_span!("processor.converter.json_to_excel").entered();

    let shape = JsonShape::from_value(data)?;
    let mut book = umya_spreadsheet::new_file();
    let mut sheets = Vec::new();

    for (index, (name, records)) in shape.into_sheets().into_iter().enumerate() {
        let name = sheet_name(&name, index);
        let schema = SheetSchema::from_records(&records);
        let worksheet = add_sheet(&mut book, index, &name)?;
        write_records(worksheet, &schema, &records);

        sheets.push(SheetSummary {
            name,
            rows: records.len(),
            columns: schema.headers.len(),
        });
    }

    let size = save_book(&book, output)?;
    tracing::info!(sheets = sheets.len(), size, "Converted JSON to workbook");
    Ok(JsonToExcelSummary { sheets, size })
}

fn write_records(worksheet: &mut Worksheet, schema: &SheetSchema, records: &[Map<String, Value>]) {
    if schema.headers.is_empty() {
        return;
    }

    let mut widths: Vec<usize> = schema.headers.iter().map(|h| h.chars().count()).collect();

    for (c, header) in schema.headers.iter().enumerate() {
        let cell = worksheet.get_cell_mut((c as u32 + 1, 1));
        cell.set_value_string(header.as_str());
        let style = cell.get_style_mut();
        style.get_font_mut().set_bold(true);
        style.set_background_color(HEADER_FILL);
    }

    for (r, record) in records.iter().enumerate() {
        let row = r as u32 + 2;
        for (c, header) in schema.headers.iter().enumerate() {
            let Some(value) = record.get(header).filter(|v| !v.is_null()) else {
                continue;
            };
            set_cell_value(worksheet.get_cell_mut((c as u32 + 1, row)), value);
            widths[c] = widths[c].max(rendered(value).chars().count());
        }
    }

    for (c, width) in widths.iter().enumerate() {
        worksheet
            .get_column_dimension_mut(&column_letter(c as u32 + 1))
            .set_width((*width as f64 + 2.0).min(MAX_COLUMN_WIDTH));
    }

    freeze_header_row(worksheet);
}

fn rendered(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn freeze_header_row(worksheet: &mut Worksheet) {
    let mut pane = Pane::default();
    pane.set_vertical_split(1.0);
    pane.set_state(PaneStateValues::Frozen);
    pane.set_active_pane(PaneValues::BottomLeft);

    let views = worksheet.get_sheet_views_mut();
    if views.get_sheet_view_list().is_empty() {
        views.add_sheet_view_list_mut(SheetView::default());
    }
    if let Some(view) = views.get_sheet_view_list_mut().first_mut() {
        view.set_pane(pane);
    }
}

/// Sheet names may not contain `[]:*?/\` and are limited to 31 characters.
fn sheet_name(name: &str, index: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c => c,
        })
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        format!("Sheet{}", index + 1)
    } else {
        cleaned
    }
}

/// Reads every sheet, using each sheet's first row as the header. A single
/// sheet yields an array of records; several yield an object keyed by sheet
/// name.
pub fn excel_to_json(path: &Path) -> Result<ExcelToJsonResult, ProcessError> {
    let _span =
        tracing::info_span!("processor.converter.excel_to_json", file = %redact_path(path))
            .entered();

    let grids = read_value_grid(path)?;
    let sheet_count = grids.len();

    let mut converted: Vec<(String, Vec<Value>)> =
        grids.into_iter().map(|grid| (grid.name.clone(), grid_to_records(grid))).collect();
    let row_count = converted.iter().map(|(_, records)| records.len()).sum();

    let data = if converted.len() > 1 {
        Value::Object(
            converted
                .into_iter()
                .map(|(name, records)| (name, Value::Array(records)))
                .collect(),
        )
    } else {
        Value::Array(converted.pop().map(|(_, records)| records).unwrap_or_default())
    };

    Ok(ExcelToJsonResult {
        data,
        sheet_count,
        row_count,
    })
}

fn grid_to_records(grid: SheetGrid) -> Vec<Value> {
    let mut rows = grid.rows.into_iter();
    let Some(header_row) = rows.next() else {
        return Vec::new();
    };
    let headers = header_names(header_row.iter().map(|cell| &cell.value));

    rows.filter(|row| row.iter().any(|cell| !cell.value.is_null()))
        .map(|row| {
            let mut cells = row.into_iter();
            let record: Map<String, Value> = headers
                .iter()
                .map(|header| {
                    let value = cells.next().map(|cell| cell.value).unwrap_or(Value::Null);
                    (header.clone(), value)
                })
                .collect();
            Value::Object(record)
        })
        .collect()
}

/// Blank headers become `ColumnN`; repeated ones get a numeric suffix.
fn header_names<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    values
        .enumerate()
        .map(|(index, value)| {
            let base = match value {
                Value::Null => format!("Column{}", index + 1),
                Value::String(s) if s.trim().is_empty() => format!("Column{}", index + 1),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{}_{}", base, count)
            }
        })
        .collect()
}
