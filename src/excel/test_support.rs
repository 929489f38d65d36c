use std::io::Cursor;
use umya_spreadsheet::{new_file, writer};

use super::types::UploadedFile;

/// One fixture cell
#[derive(Debug, Clone, Copy)]
pub enum Fixture<'a> {
    Blank,
    Text(&'a str),
    Number(f64),
    /// Number cell carrying a number format code
    Formatted(f64, &'a str),
    Bool(bool),
}

/// Build xlsx bytes whose first sheet holds `rows` of typed cells
pub fn typed_xlsx_bytes(rows: &[Vec<Fixture>]) -> Vec<u8> {
    let mut book = new_file();
    let sheet = book.get_sheet_mut(&0).expect("new workbook has a sheet");

    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let coordinate = ((c + 1) as u32, (r + 1) as u32);
            match *value {
                Fixture::Blank => {}
                Fixture::Text(text) => {
                    sheet.get_cell_mut(coordinate).set_value_string(text);
                }
                Fixture::Number(n) => {
                    sheet.get_cell_mut(coordinate).set_value_number(n);
                }
                Fixture::Formatted(n, format_code) => {
                    sheet.get_cell_mut(coordinate).set_value_number(n);
                    sheet
                        .get_style_mut(coordinate)
                        .get_number_format_mut()
                        .set_format_code(format_code);
                }
                Fixture::Bool(b) => {
                    sheet.get_cell_mut(coordinate).set_value_bool(b);
                }
            }
        }
    }

    let mut out = Cursor::new(Vec::new());
    writer::xlsx::write_writer(&book, &mut out).expect("workbook serializes");
    out.into_inner()
}

/// Build xlsx bytes whose first sheet holds `rows` as text cells; "" leaves a cell unset
pub fn xlsx_bytes(rows: &[&[&str]]) -> Vec<u8> {
    let rows: Vec<Vec<Fixture>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| if v.is_empty() { Fixture::Blank } else { Fixture::Text(*v) })
                .collect()
        })
        .collect();
    typed_xlsx_bytes(&rows)
}

pub fn xlsx_file(name: &str, rows: &[&[&str]]) -> UploadedFile {
    UploadedFile::new(name, xlsx_bytes(rows))
}

pub fn typed_xlsx_file(name: &str, rows: &[Vec<Fixture>]) -> UploadedFile {
    UploadedFile::new(name, typed_xlsx_bytes(rows))
}
