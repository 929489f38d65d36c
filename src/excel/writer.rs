use chrono::NaiveDate;
use std::io::Cursor;
use umya_spreadsheet::{new_file_empty_worksheet, writer, Worksheet};

use super::types::{ConsolidatedTable, ExcelError, CONSOLIDATED_SHEET_NAME, MAX_COLUMN_WIDTH};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Serialize a consolidated table into xlsx bytes
pub fn write_consolidated(table: &ConsolidatedTable) -> Result<Vec<u8>, ExcelError> {
    let mut book = new_file_empty_worksheet();

    let sheet = book
        .new_sheet(CONSOLIDATED_SHEET_NAME)
        .map_err(|e| ExcelError::write_error(format!("Failed to create sheet: {}", e)))?;

    // Header row
    for (col_idx, column) in table.columns.iter().enumerate() {
        let col_num = (col_idx + 1) as u32;
        sheet.get_cell_mut((col_num, 1)).set_value_string(column);
    }

    // Data rows
    for (row_idx, row) in table.rows.iter().enumerate() {
        let row_num = (row_idx + 2) as u32;

        for (col_idx, value) in row.values.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let col_num = (col_idx + 1) as u32;
            sheet.get_cell_mut((col_num, row_num)).set_value_string(value);
        }
    }

    apply_column_widths(sheet, table);

    let mut buffer = Cursor::new(Vec::new());
    writer::xlsx::write_writer(&book, &mut buffer)
        .map_err(|e| ExcelError::write_error(format!("Failed to write workbook: {}", e)))?;

    Ok(buffer.into_inner())
}

fn apply_column_widths(sheet: &mut Worksheet, table: &ConsolidatedTable) {
    for (col_idx, width) in column_widths(table).into_iter().enumerate() {
        let letter = column_index_to_letter(col_idx as u32);
        sheet
            .get_column_dimension_mut(&letter)
            .set_width(width as f64);
    }
}

/// Width per column: longest value (header included) plus two, capped
pub fn column_widths(table: &ConsolidatedTable) -> Vec<usize> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(col_idx, column)| {
            let longest_value = table
                .rows
                .iter()
                .filter_map(|row| row.values.get(col_idx))
                .map(|v| v.chars().count())
                .max()
                .unwrap_or(0);
            let longest = longest_value.max(column.chars().count());
            (longest + 2).min(MAX_COLUMN_WIDTH)
        })
        .collect()
}

/// Download name for a consolidated workbook produced on `date`
pub fn consolidated_filename(date: NaiveDate) -> String {
    format!("consolidated-excel-{}.xlsx", date.format("%Y-%m-%d"))
}

/// Convert column index (0-based) to Excel column letter (A, B, ..., Z, AA, AB, ...)
fn column_index_to_letter(index: u32) -> String {
    let mut result = String::new();
    let mut n = index + 1;

    while n > 0 {
        n -= 1;
        let c = (b'A' + (n % 26) as u8) as char;
        result.insert(0, c);
        n /= 26;
    }

    result
}
