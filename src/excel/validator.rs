//! Header extraction and cross-file header checks.
//!
//! Header names are trimmed when extracted, and the trimmed text is what previews and
//! the consolidated workbook show: a `" Name "` header is written as `"Name"`.
//! Comparisons between files use [`normalize_key`].

use unicode_normalization::UnicodeNormalization;

use super::types::*;

const ADVISORY_MESSAGE: &str =
    "Column headers differ (case/accents/empty columns), but first data row is identical. File accepted.";
const HEADER_MISMATCH_MESSAGE: &str = "Column structure differs from the first file.";
const FIRST_ROW_MISMATCH_MESSAGE: &str = "First data row also differs from the first file.";

/// Comparison key for header and cell text: accents stripped, lowercased, trimmed.
pub fn normalize_key(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

/// Extract the non-blank headers of row 0.
///
/// Blank header cells are skipped but every kept column remembers its position, so
/// data cells stay aligned with their header.
pub fn extract_header(grid: &RawGrid) -> Header {
    let columns = grid
        .rows
        .first()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter_map(|(index, cell)| {
                    let name = cell.text().trim().to_string();
                    (!name.is_empty()).then_some(HeaderColumn { index, name })
                })
                .collect()
        })
        .unwrap_or_default();

    Header { columns }
}

/// Cell texts of row 1 under each header column; empty when there is no data row
pub fn first_data_row(grid: &RawGrid, header: &Header) -> Vec<String> {
    match grid.rows.get(1) {
        Some(row) => header
            .columns
            .iter()
            .map(|c| RawGrid::cell_text(row, c.index))
            .collect(),
        None => Vec::new(),
    }
}

fn normalize_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| normalize_key(v)).collect()
}

/// Baseline for one batch: the first file's normalized headers and first data row.
///
/// Create one per batch and pass every file through [`HeaderReference::check`] in
/// upload order.
#[derive(Debug, Clone, Default)]
pub struct HeaderReference {
    baseline: Option<Baseline>,
}

#[derive(Debug, Clone)]
struct Baseline {
    headers: Vec<String>,
    first_row: Vec<String>,
}

impl HeaderReference {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn is_set(&self) -> bool {
        self.baseline.is_some()
    }

    /// Compare a file against the baseline, or adopt it as the baseline when none
    /// exists yet.
    pub fn check(&mut self, header: &Header, first_row: &[String]) -> Vec<ValidationIssue> {
        let headers = normalize_all(&header.names());
        let first_row = normalize_all(first_row);

        let baseline = match &self.baseline {
            Some(baseline) => baseline,
            None => {
                self.baseline = Some(Baseline { headers, first_row });
                return Vec::new();
            }
        };

        if headers == baseline.headers {
            return Vec::new();
        }

        if first_row == baseline.first_row {
            return vec![ValidationIssue::advisory(
                ValidationIssueKind::HeaderMismatchAdvisory,
                ADVISORY_MESSAGE,
            )];
        }

        vec![
            ValidationIssue::fatal(ValidationIssueKind::HeaderMismatch, HEADER_MISMATCH_MESSAGE),
            ValidationIssue::fatal(ValidationIssueKind::FirstRowMismatch, FIRST_ROW_MISMATCH_MESSAGE),
        ]
    }
}

/// A file is valid as long as none of its issues is fatal
pub fn is_valid(issues: &[ValidationIssue]) -> bool {
    !issues.iter().any(ValidationIssue::is_fatal)
}
