use serde::Serialize;
use thiserror::Error;

use crate::validate::Mime;

/// Why an upload was refused before any parsing happened.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SecurityRejection {
    #[error("Filename is empty")]
    EmptyFilename,
    #[error("Filename is {length} characters long (max 255)")]
    FilenameTooLong { length: usize },
    #[error("Extension '{extension}' is not accepted (csv, xlsx, xls)")]
    UnsupportedExtension { extension: String },
    #[error("File is empty")]
    EmptyContent,
    #[error("File is {size} bytes, above the {max} byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("Content type {mime} is not accepted")]
    DisallowedMime { mime: Mime },
    #[error("Content does not look like a CSV or spreadsheet export")]
    UnrecognizedSignature,
    #[error("Extension '{extension}' does not match content type {mime}")]
    ExtensionMismatch { extension: String, mime: Mime },
    #[error("Content contains a forbidden pattern: {pattern}")]
    SuspiciousContent { pattern: String },
}

/// A single offending cell, reported back to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    /// 1-based line in the file, header included.
    pub line: usize,
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for RowIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: {} '{}' ({})",
            self.line, self.field, self.value, self.reason
        )
    }
}

/// The file was safe but could not be turned into transactions.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Unreadable text encoding: {detail}")]
    UnreadableEncoding { detail: String },
    #[error("Malformed table{}: {message}", .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    MalformedTable { line: Option<u64>, message: String },
    #[error("Spreadsheet could not be read: {message}")]
    Spreadsheet { message: String },
    #[error("File has a header but no data rows")]
    NoDataRows,
    #[error("Missing required columns: {} (found: {})", .missing.join(", "), .found.join(", "))]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },
    #[error("No row has a usable operation date ({} rows rejected)", .issues.len())]
    NoResolvableMonths { issues: Vec<RowIssue> },
    #[error("{invalid} of {total} rows could not be parsed")]
    TooManyInvalidRows {
        invalid: usize,
        total: usize,
        issues: Vec<RowIssue>,
    },
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum IngestError {
    #[error("Rejected: {0}")]
    Security(#[from] SecurityRejection),
    #[error("Invalid file: {0}")]
    Validation(#[from] ValidationError),
}
