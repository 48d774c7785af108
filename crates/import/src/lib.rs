pub mod columns;
pub mod csv;
pub mod encoding;
pub mod error;
pub mod locale;
pub mod months;
pub mod pipeline;
pub mod rows;
pub mod spreadsheet;
pub mod validate;

pub use columns::{normalize_columns, resolve_columns, CanonicalColumn, ColumnMapping};
pub use csv::{read_table, Table};
pub use encoding::TextEncoding;
pub use error::{IngestError, RowIssue, SecurityRejection, ValidationError};
pub use locale::{parse_amount, parse_date, DateOrder, FieldKind, Unparseable};
pub use months::{
    detect_months, duplicate_key, find_duplicates, DuplicateRef, DuplicateReport, EmptyLedger,
    LedgerLookup, MonthCount,
};
pub use pipeline::{ingest, IngestOutcome};
pub use validate::{DetectedFormat, FileValidator, Mime};
