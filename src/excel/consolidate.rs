use std::cmp::Ordering;
use std::collections::HashMap;

use super::reader::{check_upload, compute_checksum, ingest};
use super::types::*;
use super::validator::{extract_header, first_data_row, is_valid, normalize_key, HeaderReference};

/// Merge all files into one table shaped like the first file.
///
/// Any unreadable file fails the whole batch, naming the file. Rows are
/// concatenated in upload order and then stable-sorted by the first column.
pub fn consolidate(files: &[UploadedFile]) -> Result<ConsolidatedTable, ExcelError> {
    for file in files {
        check_upload(file)?;
    }

    let mut builder = TableBuilder::new();

    for file in files {
        let grid = ingest(file)?;
        let added = builder.add(&file.filename, &grid)?;

        tracing::debug!(
            file = %file.filename,
            checksum = %compute_checksum(&file.bytes),
            records = added,
            "file ingested for consolidation"
        );
    }

    builder.finish()
}

/// Accumulates the rows of one consolidation batch.
///
/// The first file added fixes the output columns and the validation baseline.
#[derive(Debug, Default)]
pub struct TableBuilder {
    reference: HeaderReference,
    columns: Option<Vec<String>>,
    rows: Vec<ConsolidatedRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one file's grid, returning the number of records it contributed
    pub fn add(&mut self, filename: &str, grid: &RawGrid) -> Result<usize, ExcelError> {
        let header = extract_header(grid);

        if header.is_empty() {
            return Err(ExcelError::no_headers(filename));
        }

        let issues = self.reference.check(&header, &first_data_row(grid, &header));
        let equivalent = is_valid(&issues);
        if !equivalent {
            tracing::warn!(
                file = %filename,
                "column structure differs from the first file, merging by exact header name"
            );
        }

        let records = build_records(grid, &header, filename);

        if self.columns.is_none() {
            if records.is_empty() {
                return Err(ExcelError::consolidation_failed(format!(
                    "No data rows found in file: {}",
                    filename
                )));
            }
            self.columns = Some(header.names());
        }
        let canonical = self.columns.as_deref().unwrap_or_default();

        let resolver = ColumnResolver::new(&header, equivalent);
        self.rows.extend(records.iter().map(|record| ConsolidatedRow {
            values: canonical
                .iter()
                .map(|column| resolver.value(record, column).to_string())
                .collect(),
            source_file: record.source_file.clone(),
        }));

        Ok(records.len())
    }

    /// Sort the collected rows by the first column and return the table
    pub fn finish(self) -> Result<ConsolidatedTable, ExcelError> {
        let columns = self
            .columns
            .ok_or_else(|| ExcelError::consolidation_failed("No files to consolidate"))?;
        let mut rows = self.rows;

        sort_rows(&mut rows);

        Ok(ConsolidatedTable { columns, rows })
    }
}

/// Build one record per data row that has any non-blank cell
pub fn build_records(grid: &RawGrid, header: &Header, source_file: &str) -> Vec<Record> {
    grid.data_rows()
        .iter()
        .filter(|row| row.iter().any(|cell| !cell.is_blank()))
        .map(|row| Record {
            values: header
                .columns
                .iter()
                .map(|c| (c.name.clone(), RawGrid::cell_text(row, c.index)))
                .collect(),
            source_file: source_file.to_string(),
        })
        .collect()
}

/// Maps canonical column names onto one file's headers.
///
/// Exact names always match. The normalized key is only consulted for a file the
/// validator accepted as equivalent to the first one.
struct ColumnResolver {
    by_key: Option<HashMap<String, String>>,
}

impl ColumnResolver {
    fn new(header: &Header, fold_names: bool) -> Self {
        let by_key = fold_names.then(|| {
            let mut by_key = HashMap::new();
            for column in &header.columns {
                by_key
                    .entry(normalize_key(&column.name))
                    .or_insert_with(|| column.name.clone());
            }
            by_key
        });
        ColumnResolver { by_key }
    }

    fn value<'a>(&self, record: &'a Record, column: &str) -> &'a str {
        record
            .get(column)
            .or_else(|| {
                self.by_key
                    .as_ref()?
                    .get(&normalize_key(column))
                    .and_then(|name| record.get(name))
            })
            .unwrap_or("")
    }
}

/// Stable sort by the first column; each row's key is folded once
fn sort_rows(rows: &mut [ConsolidatedRow]) {
    rows.sort_by_cached_key(|row| {
        NaturalKey::new(row.values.first().map(String::as_str).unwrap_or(""))
    });
}

/// A value folded for natural ordering.
///
/// Values differing only in case, accents or leading zeros are equal, so their rows
/// keep upload order.
#[derive(Debug, Clone)]
struct NaturalKey(Vec<char>);

impl NaturalKey {
    fn new(value: &str) -> Self {
        NaturalKey(normalize_key(value).chars().collect())
    }
}

impl Ord for NaturalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_folded(&self.0, &other.0)
    }
}

impl PartialOrd for NaturalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NaturalKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NaturalKey {}

/// Compare strings the way people order them: digit runs by numeric value, letters
/// without regard to case or accents. `"9" < "10"`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    NaturalKey::new(a).cmp(&NaturalKey::new(b))
}

fn compare_folded(a: &[char], b: &[char]) -> Ordering {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let a_end = digit_run_end(a, i);
            let b_end = digit_run_end(b, j);

            let ord = compare_digit_runs(&a[i..a_end], &b[j..b_end]);
            if ord != Ordering::Equal {
                return ord;
            }

            i = a_end;
            j = b_end;
        } else {
            let ord = a[i].cmp(&b[j]);
            if ord != Ordering::Equal {
                return ord;
            }

            i += 1;
            j += 1;
        }
    }

    (a.len() - i).cmp(&(b.len() - j))
}

fn digit_run_end(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map(|offset| start + offset)
        .unwrap_or(chars.len())
}

fn compare_digit_runs(a: &[char], b: &[char]) -> Ordering {
    let a = trim_leading_zeros(a);
    let b = trim_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn trim_leading_zeros(digits: &[char]) -> &[char] {
    let first_significant = digits.iter().position(|&c| c != '0').unwrap_or(digits.len());
    &digits[first_significant..]
}
