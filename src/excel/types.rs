use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum accepted size of a single uploaded file (50 MiB)
pub const MAX_FILE_SIZE_BYTES: usize = 50 * 1024 * 1024;
/// Number of data rows included in a preview sample
pub const SAMPLE_ROW_LIMIT: usize = 5;
/// Upper bound for auto-sized column widths, in characters
pub const MAX_COLUMN_WIDTH: usize = 50;
/// Name of the single sheet in a consolidated workbook
pub const CONSOLIDATED_SHEET_NAME: &str = "Consolidated Data";

// ==================== Uploads ====================

/// One file received from the client, fully buffered in memory
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Size reported by the transport. Can exceed `bytes.len()` when buffering
    /// stopped at the size cap.
    pub size: usize,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        UploadedFile {
            filename: filename.into(),
            bytes,
            size,
        }
    }

    /// A file whose body was not stored because it exceeded the cap.
    pub fn oversized(filename: impl Into<String>, size: usize) -> Self {
        UploadedFile {
            filename: filename.into(),
            bytes: Vec::new(),
            size,
        }
    }
}

// ==================== Cells ====================

/// Represents a cell value with type information
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    String(String),
    Number(f64),
    Boolean(bool),
    /// ISO 8601: `YYYY-MM-DDTHH:MM:SS`, or `HH:MM:SS` for a time of day
    DateTime(String),
    Error(String),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

/// A decoded cell together with the text a spreadsheet application displays for it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCell {
    pub value: CellValue,
    pub formatted: Option<String>,
}

impl RawCell {
    pub fn new(value: CellValue, formatted: Option<String>) -> Self {
        RawCell { value, formatted }
    }

    pub fn empty() -> Self {
        RawCell::default()
    }

    /// Cell text used for validation, records and output.
    ///
    /// Display text containing a slash (fractions, slash-separated dates) is kept
    /// verbatim. Otherwise numbers use their full-precision value and dates their
    /// underlying ISO value, and everything else falls back to the display text.
    pub fn text(&self) -> String {
        if let Some(formatted) = self.formatted.as_deref() {
            if formatted.contains('/') {
                return formatted.to_string();
            }
        }

        match &self.value {
            CellValue::Number(n) => format_number(*n),
            CellValue::DateTime(iso) => iso.clone(),
            other => self
                .formatted
                .clone()
                .or_else(|| raw_text(other))
                .unwrap_or_default(),
        }
    }

    /// Whether the cell counts as blank for row filtering
    pub fn is_blank(&self) -> bool {
        self.text().trim().is_empty()
    }

    /// Value shown in a preview sample: numbers and booleans stay typed, dates are
    /// reduced to their calendar date and times of day are kept.
    pub fn preview_value(&self) -> Value {
        match &self.value {
            CellValue::Empty => Value::String(String::new()),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                Value::from(*n as i64)
            }
            CellValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(self.text())),
            CellValue::Boolean(b) => Value::Bool(*b),
            CellValue::DateTime(iso) => {
                let date = iso.split('T').next().unwrap_or(iso);
                Value::String(date.to_string())
            }
            CellValue::String(_) | CellValue::Error(_) => Value::String(self.text()),
        }
    }
}

fn raw_text(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Empty => None,
        CellValue::String(s) => Some(s.clone()),
        CellValue::Number(n) => Some(format_number(*n)),
        CellValue::Boolean(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        CellValue::DateTime(iso) => Some(iso.clone()),
        CellValue::Error(e) => Some(e.clone()),
    }
}

/// Shortest decimal string that round-trips to the same f64
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        n.to_string()
    }
}

/// Rows of cells from the first worksheet; row 0 is the header row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGrid {
    pub rows: Vec<Vec<RawCell>>,
}

impl RawGrid {
    pub fn new(rows: Vec<Vec<RawCell>>) -> Self {
        RawGrid { rows }
    }

    /// Build a grid of plain string cells
    #[cfg(test)]
    pub fn from_text_rows(rows: &[&[&str]]) -> Self {
        RawGrid {
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|s| {
                            if s.is_empty() {
                                RawCell::empty()
                            } else {
                                RawCell::new(CellValue::String(s.to_string()), Some(s.to_string()))
                            }
                        })
                        .collect()
                })
                .collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Data rows, i.e. everything after the header row
    pub fn data_rows(&self) -> &[Vec<RawCell>] {
        self.rows.get(1..).unwrap_or(&[])
    }

    /// Cell text at a position; absent cells read as ""
    pub fn cell_text(row: &[RawCell], index: usize) -> String {
        row.get(index).map(RawCell::text).unwrap_or_default()
    }
}

// ==================== Headers & Validation ====================

/// A non-blank header cell and the column it sits in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderColumn {
    pub index: usize,
    pub name: String,
}

/// Non-blank headers from row 0, in column order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub columns: Vec<HeaderColumn>,
}

impl Header {
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether a row has a non-blank cell under at least one header column
    pub fn row_has_data(&self, row: &[RawCell]) -> bool {
        self.columns
            .iter()
            .any(|c| row.get(c.index).map(|cell| !cell.is_blank()).unwrap_or(false))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationIssueKind {
    InvalidFileType,
    FileTooLarge,
    NoWorksheet,
    EmptyFile,
    NoHeaders,
    DecodeError,
    HeaderMismatch,
    FirstRowMismatch,
    HeaderMismatchAdvisory,
    InternalError,
}

/// A problem found while previewing one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub kind: ValidationIssueKind,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    pub fn fatal(kind: ValidationIssueKind, message: impl Into<String>) -> Self {
        ValidationIssue {
            kind,
            severity: Severity::Fatal,
            message: message.into(),
        }
    }

    pub fn advisory(kind: ValidationIssueKind, message: impl Into<String>) -> Self {
        ValidationIssue {
            kind,
            severity: Severity::Advisory,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl From<&ExcelError> for ValidationIssue {
    fn from(e: &ExcelError) -> Self {
        let kind = match e.error_type {
            ExcelErrorType::InvalidFileType => ValidationIssueKind::InvalidFileType,
            ExcelErrorType::FileTooLarge => ValidationIssueKind::FileTooLarge,
            ExcelErrorType::NoWorksheet => ValidationIssueKind::NoWorksheet,
            ExcelErrorType::EmptyFile => ValidationIssueKind::EmptyFile,
            ExcelErrorType::NoHeaders => ValidationIssueKind::NoHeaders,
            ExcelErrorType::DecodeError => ValidationIssueKind::DecodeError,
            ExcelErrorType::ConsolidationFailed
            | ExcelErrorType::WriteError
            | ExcelErrorType::InternalError => ValidationIssueKind::InternalError,
        };
        ValidationIssue::fatal(kind, e.message.clone())
    }
}

// ==================== Preview ====================

/// Preview of a single uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEntry {
    pub filename: String,
    pub columns: Vec<String>,
    pub sample_rows: Vec<Map<String, Value>>,
    pub total_rows: usize,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub issues: Vec<ValidationIssue>,
    pub checksum: String,
}

impl PreviewEntry {
    /// Entry for a file that could not be read at all
    pub fn rejected(filename: &str, checksum: String, error: &ExcelError) -> Self {
        let issue = ValidationIssue::from(error);
        PreviewEntry {
            filename: filename.to_string(),
            columns: Vec::new(),
            sample_rows: Vec::new(),
            total_rows: 0,
            is_valid: false,
            errors: vec![issue.message.clone()],
            issues: vec![issue],
            checksum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSummary {
    pub total_files: usize,
    pub valid_files: usize,
    pub total_rows: usize,
    pub all_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub previews: Vec<PreviewEntry>,
    pub summary: PreviewSummary,
}

// ==================== Consolidation ====================

/// One data row keyed by its file's header names
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<(String, String)>,
    pub source_file: String,
}

impl Record {
    /// Value for a header name; with duplicate names the rightmost column wins
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedRow {
    pub values: Vec<String>,
    pub source_file: String,
}

/// Merged rows projected onto the first file's columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidatedTable {
    pub columns: Vec<String>,
    pub rows: Vec<ConsolidatedRow>,
}

// ==================== Errors ====================

/// Excel-specific errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ExcelError {
    pub message: String,
    pub error_type: ExcelErrorType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcelErrorType {
    InvalidFileType,
    FileTooLarge,
    NoWorksheet,
    EmptyFile,
    NoHeaders,
    DecodeError,
    ConsolidationFailed,
    WriteError,
    InternalError,
}

impl ExcelErrorType {
    /// Errors caused by the uploaded content rather than by the service
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ExcelErrorType::WriteError | ExcelErrorType::InternalError)
    }
}

impl ExcelError {
    pub fn new(message: impl Into<String>, error_type: ExcelErrorType) -> Self {
        ExcelError {
            message: message.into(),
            error_type,
        }
    }

    pub fn invalid_file_type(filename: &str) -> Self {
        ExcelError::new(
            format!("Invalid file type: {}. Only .xlsx and .xls files are supported.", filename),
            ExcelErrorType::InvalidFileType,
        )
    }

    pub fn file_too_large(filename: &str) -> Self {
        ExcelError::new(
            format!("File too large: {}. Maximum size is 50MB.", filename),
            ExcelErrorType::FileTooLarge,
        )
    }

    pub fn no_worksheet(filename: &str) -> Self {
        ExcelError::new(
            format!("No worksheets found in file: {}", filename),
            ExcelErrorType::NoWorksheet,
        )
    }

    pub fn empty_file(filename: &str) -> Self {
        ExcelError::new(format!("Empty file: {}", filename), ExcelErrorType::EmptyFile)
    }

    pub fn no_headers(filename: &str) -> Self {
        ExcelError::new(
            format!("No headers found in file: {}", filename),
            ExcelErrorType::NoHeaders,
        )
    }

    pub fn decode_error(filename: &str, detail: impl std::fmt::Display) -> Self {
        ExcelError::new(
            format!(
                "Failed to process file: {}. Please ensure it's a valid Excel file. ({})",
                filename, detail
            ),
            ExcelErrorType::DecodeError,
        )
    }

    pub fn consolidation_failed(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::ConsolidationFailed)
    }

    pub fn write_error(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::WriteError)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::InternalError)
    }
}
