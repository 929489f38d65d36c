use serde_json::{Map, Value};

use super::reader::{compute_checksum, ingest};
use super::types::*;
use super::validator::{extract_header, first_data_row, is_valid, HeaderReference};

const NO_HEADERS_MESSAGE: &str = "No column headers found.";

/// Preview every file of a batch.
///
/// A file that cannot be read becomes an invalid entry; the remaining files are still
/// previewed. The first readable file with headers is the reference the others are
/// validated against.
pub fn preview_batch(files: &[UploadedFile]) -> PreviewResponse {
    let mut reference = HeaderReference::new();

    let previews: Vec<PreviewEntry> = files
        .iter()
        .map(|file| preview_file(file, &mut reference))
        .collect();

    let summary = summarize(&previews);

    PreviewResponse { previews, summary }
}

fn preview_file(file: &UploadedFile, reference: &mut HeaderReference) -> PreviewEntry {
    let checksum = compute_checksum(&file.bytes);

    let grid = match ingest(file) {
        Ok(grid) => grid,
        Err(e) => {
            tracing::warn!(file = %file.filename, error = %e, "file rejected during preview");
            return PreviewEntry::rejected(&file.filename, checksum, &e);
        }
    };

    preview_grid(&file.filename, checksum, &grid, reference)
}

fn preview_grid(
    filename: &str,
    checksum: String,
    grid: &RawGrid,
    reference: &mut HeaderReference,
) -> PreviewEntry {
    let header = extract_header(grid);

    let issues = if header.is_empty() {
        vec![ValidationIssue::fatal(ValidationIssueKind::NoHeaders, NO_HEADERS_MESSAGE)]
    } else {
        reference.check(&header, &first_data_row(grid, &header))
    };

    let mut data_rows = grid.data_rows().iter().filter(|row| header.row_has_data(row));

    let sample_rows: Vec<Map<String, Value>> = data_rows
        .by_ref()
        .take(SAMPLE_ROW_LIMIT)
        .map(|row| sample_record(&header, row))
        .collect();
    let total_rows = sample_rows.len() + data_rows.count();

    tracing::debug!(
        file = %filename,
        checksum = %checksum,
        columns = header.len(),
        total_rows,
        issues = issues.len(),
        "file previewed"
    );

    PreviewEntry {
        filename: filename.to_string(),
        columns: header.names(),
        sample_rows,
        total_rows,
        is_valid: is_valid(&issues),
        errors: issues.iter().map(|i| i.message.clone()).collect(),
        issues,
        checksum,
    }
}

fn sample_record(header: &Header, row: &[RawCell]) -> Map<String, Value> {
    let mut record = Map::new();
    for column in &header.columns {
        let value = row
            .get(column.index)
            .map(RawCell::preview_value)
            .unwrap_or_else(|| Value::String(String::new()));
        record.insert(column.name.clone(), value);
    }
    record
}

fn summarize(previews: &[PreviewEntry]) -> PreviewSummary {
    let mut all_columns: Vec<String> = Vec::new();
    for column in previews.iter().flat_map(|p| p.columns.iter()) {
        if !all_columns.contains(column) {
            all_columns.push(column.clone());
        }
    }

    PreviewSummary {
        total_files: previews.len(),
        valid_files: previews.iter().filter(|p| p.is_valid).count(),
        total_rows: previews.iter().map(|p| p.total_rows).sum(),
        all_columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::test_support::{typed_xlsx_file, xlsx_file, Fixture};

    #[test]
    fn test_single_file_preview() {
        let file = xlsx_file(
            "people.xlsx",
            &[
                &["ID", "Name"],
                &["1", "Alice"],
                &["", ""],
                &["2", "Bob"],
            ],
        );
        let response = preview_batch(&[file]);
        let entry = &response.previews[0];

        assert!(entry.is_valid);
        assert!(entry.errors.is_empty());
        assert_eq!(entry.columns, vec!["ID", "Name"]);
        assert_eq!(entry.total_rows, 2);
        assert_eq!(entry.sample_rows.len(), 2);
        assert_eq!(entry.sample_rows[1]["Name"], Value::String("Bob".into()));
        assert_eq!(entry.checksum.len(), 64);
    }

    #[test]
    fn test_sample_is_bounded() {
        let mut rows: Vec<Vec<String>> = vec![vec!["N".to_string()]];
        rows.extend((1..=8).map(|i| vec![i.to_string()]));
        let rows_ref: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
        let rows_slices: Vec<&[&str]> = rows_ref.iter().map(Vec::as_slice).collect();

        let response = preview_batch(&[xlsx_file("n.xlsx", &rows_slices)]);
        let entry = &response.previews[0];
        assert_eq!(entry.sample_rows.len(), SAMPLE_ROW_LIMIT);
        assert_eq!(entry.total_rows, 8);
    }

    #[test]
    fn test_bad_file_does_not_abort_batch() {
        let good = xlsx_file("good.xlsx", &[&["ID"], &["1"]]);
        let bad = UploadedFile::new("notes.txt", b"hello".to_vec());
        let response = preview_batch(&[bad, good]);

        assert_eq!(response.previews.len(), 2);
        assert!(!response.previews[0].is_valid);
        assert_eq!(response.previews[0].issues[0].kind, ValidationIssueKind::InvalidFileType);
        assert!(response.previews[1].is_valid);
        assert_eq!(response.summary.valid_files, 1);
        assert_eq!(response.summary.total_files, 2);
    }

    #[test]
    fn test_advisory_and_fatal_mismatches() {
        let first = xlsx_file("a.xlsx", &[&["Name", "Age"], &["Alice", "30"]]);
        let advisory = xlsx_file("b.xlsx", &[&["Nom", "Age"], &["Alice", "30"]]);
        let fatal = xlsx_file("c.xlsx", &[&["Nom", "Age"], &["Bob", "41"]]);
        let response = preview_batch(&[first, advisory, fatal]);

        assert!(response.previews[0].is_valid);

        let b = &response.previews[1];
        assert!(b.is_valid);
        assert_eq!(b.errors.len(), 1);
        assert_eq!(b.issues[0].severity, Severity::Advisory);

        let c = &response.previews[2];
        assert!(!c.is_valid);
        assert_eq!(c.errors.len(), 2);
        assert!(c.issues.iter().all(ValidationIssue::is_fatal));
    }

    #[test]
    fn test_missing_headers_are_fatal() {
        let grid = RawGrid::from_text_rows(&[&[" ", "  "], &["1", "2"]]);
        let mut reference = HeaderReference::new();
        let entry = preview_grid("blank.xlsx", String::new(), &grid, &mut reference);

        assert!(!entry.is_valid);
        assert_eq!(entry.issues[0].kind, ValidationIssueKind::NoHeaders);
        assert_eq!(entry.total_rows, 0);
        assert!(!reference.is_set());
    }

    #[test]
    fn test_total_rows_counts_header_projection() {
        let grid = RawGrid::from_text_rows(&[
            &["ID", "", "Name"],
            &["1", "", "Ann"],
            &["", "only-unlabelled", ""],
            &["", "", "Bo"],
        ]);
        let mut reference = HeaderReference::new();
        let entry = preview_grid("p.xlsx", String::new(), &grid, &mut reference);

        assert_eq!(entry.total_rows, 2);
        assert_eq!(entry.sample_rows[1]["ID"], Value::String(String::new()));
        assert_eq!(entry.sample_rows[1]["Name"], Value::String("Bo".into()));
    }

    #[test]
    fn test_typed_sample_values() {
        let file = typed_xlsx_file(
            "typed.xlsx",
            &[
                vec![
                    Fixture::Text("Date"),
                    Fixture::Text("Qty"),
                    Fixture::Text("Price"),
                    Fixture::Text("Paid"),
                ],
                vec![
                    Fixture::Formatted(45306.0, "dd/mm/yyyy"),
                    Fixture::Number(30.0),
                    Fixture::Number(2.5),
                    Fixture::Bool(true),
                ],
            ],
        );
        let response = preview_batch(&[file]);
        let sample = &response.previews[0].sample_rows[0];

        assert_eq!(sample["Date"], Value::String("2024-01-15".into()));
        assert_eq!(sample["Qty"], serde_json::json!(30));
        assert_eq!(sample["Price"], serde_json::json!(2.5));
        assert_eq!(sample["Paid"], Value::Bool(true));
    }

    #[test]
    fn test_summary_columns_union() {
        let a = xlsx_file("a.xlsx", &[&["ID", "Name"], &["1", "A"]]);
        let b = xlsx_file("b.xlsx", &[&["ID", "City"], &["1", "A"]]);
        let response = preview_batch(&[a, b]);

        assert_eq!(response.summary.all_columns, vec!["ID", "Name", "City"]);
        assert_eq!(response.summary.total_rows, 2);
    }

    #[test]
    fn test_preview_is_deterministic() {
        let files = vec![
            xlsx_file("a.xlsx", &[&["ID", "Name"], &["2", "Bob"], &["1", "Alice"]]),
            xlsx_file("b.xlsx", &[&["id", "name"], &["3", "Carl"]]),
        ];
        assert_eq!(preview_batch(&files), preview_batch(&files));
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let response = preview_batch(&[xlsx_file("a.xlsx", &[&["ID"], &["1"]])]);
        let json = serde_json::to_value(&response).unwrap();

        let entry = &json["previews"][0];
        assert!(entry.get("sampleRows").is_some());
        assert!(entry.get("totalRows").is_some());
        assert_eq!(entry["isValid"], Value::Bool(true));
        assert!(json["summary"].get("allColumns").is_some());
    }
}
