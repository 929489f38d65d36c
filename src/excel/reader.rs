use calamine::{open_workbook_auto_from_rs, Data, ExcelDateTime, ExcelDateTimeType, Range, Reader, Sheets};
use chrono::{Datelike, Duration};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::LazyLock;
use umya_spreadsheet::reader::xlsx as xlsx_reader;
use umya_spreadsheet::NumberingFormat;

use super::types::*;

/// Accepted upload extensions, matched case-insensitively
static ALLOWED_EXTENSIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(xlsx|xls)$").expect("extension pattern is valid"));

/// Local file header signature of a zip container (xlsx)
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Display text of numeric cells, keyed by absolute (row, col), 0-based
type DisplayTexts = HashMap<(u32, u32), String>;

/// Decode the first worksheet of an uploaded file into a grid of cells
pub fn ingest(file: &UploadedFile) -> Result<RawGrid, ExcelError> {
    check_upload(file)?;

    let grid = read_first_sheet(&file.filename, &file.bytes)?;

    if grid.row_count() == 0 {
        return Err(ExcelError::empty_file(&file.filename));
    }

    Ok(grid)
}

/// Check file type and size without decoding anything
pub fn check_upload(file: &UploadedFile) -> Result<(), ExcelError> {
    if !is_allowed_file_name(&file.filename) {
        return Err(ExcelError::invalid_file_type(&file.filename));
    }

    if file.size > MAX_FILE_SIZE_BYTES || file.bytes.len() > MAX_FILE_SIZE_BYTES {
        return Err(ExcelError::file_too_large(&file.filename));
    }

    Ok(())
}

pub fn is_allowed_file_name(filename: &str) -> bool {
    ALLOWED_EXTENSIONS.is_match(filename)
}

/// Read the first sheet of a workbook held in memory
fn read_first_sheet(filename: &str, bytes: &[u8]) -> Result<RawGrid, ExcelError> {
    let mut workbook: Sheets<_> = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ExcelError::decode_error(filename, e))?;

    let sheet_names = workbook.sheet_names();
    let first_sheet = first_sheet_name(&sheet_names, filename)?;

    let range = workbook
        .worksheet_range(first_sheet)
        .map_err(|e| ExcelError::decode_error(filename, e))?;

    let display = display_texts(filename, bytes, first_sheet);

    Ok(grid_from_range(&range, &display))
}

/// Only the first sheet is ever read; the others are ignored
fn first_sheet_name<'a>(sheet_names: &'a [String], filename: &str) -> Result<&'a str, ExcelError> {
    sheet_names
        .first()
        .map(String::as_str)
        .ok_or_else(|| ExcelError::no_worksheet(filename))
}

/// Render numeric cells of an xlsx sheet through their number formats.
///
/// Cells in the General format are skipped; their value already is their text.
/// Other containers, and xlsx files umya-spreadsheet cannot render, yield no display
/// text; their cells then fall back to the underlying values.
fn display_texts(filename: &str, bytes: &[u8], sheet_name: &str) -> DisplayTexts {
    if !bytes.starts_with(ZIP_MAGIC) {
        return DisplayTexts::new();
    }

    let rendered = catch_unwind(AssertUnwindSafe(|| {
        let book = xlsx_reader::read_reader(Cursor::new(bytes), true).map_err(|e| e.to_string())?;
        let sheet = book
            .get_sheet_by_name(sheet_name)
            .ok_or_else(|| format!("sheet '{}' not found", sheet_name))?;

        let mut texts = DisplayTexts::new();
        for cell in sheet.get_cell_collection() {
            let formatted = cell
                .get_style()
                .get_number_format()
                .is_some_and(|f| f.get_format_code() != NumberingFormat::FORMAT_GENERAL);
            if !formatted || cell.get_value_number().is_none() {
                continue;
            }
            let col = *cell.get_coordinate().get_col_num();
            let row = *cell.get_coordinate().get_row_num();
            let text = sheet.get_formatted_value((col, row));
            if !text.is_empty() {
                texts.insert((row - 1, col - 1), text);
            }
        }
        Ok::<_, String>(texts)
    }));

    match rendered {
        Ok(Ok(texts)) => texts,
        Ok(Err(e)) => {
            tracing::debug!(file = %filename, error = %e, "number formats unavailable");
            DisplayTexts::new()
        }
        Err(_) => {
            tracing::warn!(file = %filename, "number format rendering panicked, using raw values");
            DisplayTexts::new()
        }
    }
}

/// Materialize the used range of a sheet; cells missing from the range become empty
fn grid_from_range(range: &Range<Data>, display: &DisplayTexts) -> RawGrid {
    let (row_count, col_count) = range.get_size();
    let (first_row, first_col) = range.start().unwrap_or((0, 0));

    let rows = (0..row_count)
        .map(|row_idx| {
            (0..col_count)
                .map(|col_idx| {
                    let position = (first_row + row_idx as u32, first_col + col_idx as u32);
                    convert_cell(range.get((row_idx, col_idx)), display.get(&position).cloned())
                })
                .collect()
        })
        .collect();

    RawGrid::new(rows)
}

/// Convert calamine Data to a cell.
///
/// `display` is the text rendered from the cell's number format, if any. Strings,
/// booleans and error codes display as themselves.
fn convert_cell(cell: Option<&Data>, display: Option<String>) -> RawCell {
    match cell {
        None | Some(Data::Empty) => RawCell::empty(),
        Some(Data::String(s)) => RawCell::new(CellValue::String(s.clone()), Some(s.clone())),
        Some(Data::Float(f)) => RawCell::new(CellValue::Number(*f), display),
        Some(Data::Int(i)) => RawCell::new(CellValue::Number(*i as f64), display),
        Some(Data::Bool(b)) => {
            let text = if *b { "TRUE" } else { "FALSE" };
            RawCell::new(CellValue::Boolean(*b), Some(text.to_string()))
        }
        Some(Data::DateTime(dt)) => {
            // umya renders serials against the 1900 epoch only
            let display = if uses_1904_epoch(dt) { None } else { display };
            RawCell::new(date_value(dt), display)
        }
        Some(Data::DateTimeIso(s)) => RawCell::new(CellValue::DateTime(s.clone()), Some(s.clone())),
        Some(Data::DurationIso(s)) => RawCell::new(CellValue::String(s.clone()), Some(s.clone())),
        Some(Data::Error(e)) => {
            let code = e.to_string();
            RawCell::new(CellValue::Error(code.clone()), Some(code))
        }
    }
}

/// Underlying value of a date-formatted cell.
///
/// Dates become ISO `YYYY-MM-DDTHH:MM:SS`. Serials below one day carry no calendar
/// date and become a time of day `HH:MM:SS`. Durations become `h:mm:ss`.
fn date_value(dt: &ExcelDateTime) -> CellValue {
    if dt.is_duration() {
        return match dt.as_duration() {
            Some(duration) => CellValue::String(format_duration(duration)),
            None => CellValue::Number(dt.as_f64()),
        };
    }

    match dt.as_datetime() {
        Some(datetime) if datetime.year() < 1900 => {
            CellValue::DateTime(datetime.format("%H:%M:%S").to_string())
        }
        Some(datetime) => CellValue::DateTime(datetime.format("%Y-%m-%dT%H:%M:%S").to_string()),
        None => CellValue::Number(dt.as_f64()),
    }
}

fn uses_1904_epoch(dt: &ExcelDateTime) -> bool {
    let as_1900 = ExcelDateTime::new(dt.as_f64(), ExcelDateTimeType::DateTime, false);
    dt.is_datetime() && dt.as_datetime() != as_1900.as_datetime()
}

/// Elapsed time as `h:mm:ss`
fn format_duration(duration: Duration) -> String {
    let total_seconds = (duration.num_milliseconds() as f64 / 1000.0).round() as i64;
    let sign = if total_seconds < 0 { "-" } else { "" };
    let total_seconds = total_seconds.abs();

    format!(
        "{}{}:{:02}:{:02}",
        sign,
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60
    )
}

/// Compute SHA-256 checksum of uploaded bytes
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
