//! Excel module for ingesting, validating, previewing and consolidating uploads.
//!
//! This module provides:
//! - Decoding the first worksheet of an uploaded workbook
//! - Header normalization and cross-file consistency checks
//! - Bounded previews of each file in a batch
//! - Merging a batch into one sorted table and writing it back to xlsx

pub mod types;
pub mod reader;
pub mod validator;
pub mod preview;
pub mod consolidate;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types and functions
pub use types::*;
pub use reader::{compute_checksum, ingest};
pub use validator::{normalize_key, HeaderReference};
pub use preview::preview_batch;
pub use consolidate::{consolidate, natural_cmp};
pub use writer::{consolidated_filename, write_consolidated, XLSX_CONTENT_TYPE};
