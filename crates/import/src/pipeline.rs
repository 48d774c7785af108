use std::collections::BTreeMap;
use std::time::Instant;

use releve_core::{CanonicalTransaction, ImportBatch, ImportSettings, Month, MonthSummary};
use serde::Serialize;
use uuid::Uuid;

use crate::columns;
use crate::csv::{self, Table};
use crate::error::IngestError;
use crate::locale::DateOrder;
use crate::months::{self, DuplicateReport, LedgerLookup};
use crate::rows;
use crate::validate::{self, FileValidator};

/// Everything one ingestion produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub batch: ImportBatch,
    /// Every valid row, duplicates included, in file order.
    pub transactions: Vec<CanonicalTransaction>,
    pub duplicates: DuplicateReport,
}

impl IngestOutcome {
    /// Transactions not already in the ledger.
    pub fn new_transactions(&self) -> impl Iterator<Item = &CanonicalTransaction> {
        self.transactions
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.duplicates.is_duplicate(*i))
            .map(|(_, tx)| tx)
    }

    /// Content keys of all ingested rows; feed back as the ledger for the next run.
    pub fn duplicate_keys(&self) -> Vec<String> {
        self.transactions.iter().map(months::duplicate_key).collect()
    }
}

/// Orchestrates: validate → read → map columns → parse rows → bucket months → flag duplicates.
pub fn ingest(
    filename: &str,
    content: &[u8],
    settings: &ImportSettings,
    ledger: &dyn LedgerLookup,
) -> Result<IngestOutcome, IngestError> {
    let started = Instant::now();

    // 1. Security gate.
    let format = FileValidator::new(settings.max_file_bytes).inspect(filename, content)?;
    tracing::debug!(filename, mime = %format.mime, bom = format.has_bom, "upload accepted");

    // 2. Decode and split into rows, then scan what was decoded.
    let table = csv::read_table(content)?;
    if let Err(reason) = validate::scan_table(&table) {
        tracing::warn!(filename, %reason, "upload rejected after decoding");
        return Err(reason.into());
    }
    if table.rows.is_empty() {
        return Err(crate::error::ValidationError::NoDataRows.into());
    }

    // 3. Resolve the header onto canonical columns.
    let mapping = columns::resolve_columns(&table.headers)?;
    let canonical_rows: Vec<_> = table
        .rows
        .iter()
        .map(|row| columns::apply_mapping(&mapping, row))
        .collect();

    // 4. Typed transactions.
    let parsed = rows::parse_rows(
        &canonical_rows,
        &table.lines,
        DateOrder::from_day_first(settings.day_first),
    );
    rows::check_tolerance(&parsed, settings.max_invalid_ratio)?;

    // 5. Months and duplicates.
    let duplicates = months::find_duplicates(&parsed.transactions, ledger);
    let detected_months = summarize_months(&parsed.transactions, &duplicates);

    let Table {
        encoding,
        delimiter,
        ..
    } = table;
    let batch = ImportBatch {
        batch_id: Uuid::new_v4(),
        filename: filename.to_string(),
        row_count: parsed.transactions.len(),
        duplicate_count: duplicates.duplicate_count,
        detected_months,
        warnings: parsed.warnings,
        processing_time_ms: started.elapsed().as_millis() as u64,
        encoding,
        delimiter,
    };

    tracing::info!(
        batch_id = %batch.batch_id,
        filename,
        rows = batch.row_count,
        duplicates = batch.duplicate_count,
        skipped = parsed.issues.len(),
        months = batch.detected_months.len(),
        elapsed_ms = batch.processing_time_ms,
        "import batch complete"
    );

    Ok(IngestOutcome {
        batch,
        transactions: parsed.transactions,
        duplicates,
    })
}

fn summarize_months(
    transactions: &[CanonicalTransaction],
    duplicates: &DuplicateReport,
) -> Vec<MonthSummary> {
    let mut by_month: BTreeMap<Month, (usize, usize)> = BTreeMap::new();
    for (i, tx) in transactions.iter().enumerate() {
        let entry = by_month.entry(tx.month()).or_default();
        if duplicates.is_duplicate(i) {
            entry.1 += 1;
        } else {
            entry.0 += 1;
        }
    }
    by_month
        .into_iter()
        .map(|(month, (new_count, duplicate_count))| MonthSummary {
            month,
            new_count,
            duplicate_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SecurityRejection, ValidationError};
    use crate::months::EmptyLedger;
    use std::collections::HashSet;

    const JANUARY: &str = "Date,Description,Montant,Compte\n\
        15/01/2024,CB POKAWA NATION 75011,\"-12,50\",Courant\n\
        16/01/2024,PRLV EDF CLIENTS,\"-40,00\",Courant\n\
        31/01/2024,VIR SALAIRE ACME,\"2 100,00\",Courant\n";

    fn settings() -> ImportSettings {
        ImportSettings::default()
    }

    #[test]
    fn happy_path_single_month() {
        let outcome = ingest("janvier.csv", JANUARY.as_bytes(), &settings(), &EmptyLedger).unwrap();
        let batch = &outcome.batch;
        assert_eq!(batch.row_count, 3);
        assert_eq!(batch.duplicate_count, 0);
        assert_eq!(batch.detected_months.len(), 1);
        assert_eq!(batch.detected_months[0].month.to_string(), "2024-01");
        assert_eq!(batch.detected_months[0].new_count, 3);
        assert_eq!(batch.detected_months[0].duplicate_count, 0);
        assert_eq!(batch.encoding, "UTF-8");
        assert_eq!(batch.delimiter, Some(','));
        assert!(batch.warnings.is_empty());
        assert_eq!(outcome.transactions[0].account.as_deref(), Some("Courant"));
    }

    #[test]
    fn second_pass_is_all_duplicates() {
        let first = ingest("a.csv", JANUARY.as_bytes(), &settings(), &EmptyLedger).unwrap();
        let ledger: HashSet<String> = first.duplicate_keys().into_iter().collect();
        let second = ingest("a.csv", JANUARY.as_bytes(), &settings(), &ledger).unwrap();
        assert_eq!(second.batch.duplicate_count, second.batch.row_count);
        assert_eq!(second.batch.new_count(), 0);
        assert_eq!(second.new_transactions().count(), 0);
        assert_eq!(second.batch.detected_months[0].duplicate_count, 3);
        assert_ne!(first.batch.batch_id, second.batch.batch_id);
    }

    #[test]
    fn missing_date_column_names_date_op() {
        let data = "Libellé,Montant\nPOKAWA,-12\n";
        match ingest("x.csv", data.as_bytes(), &settings(), &EmptyLedger) {
            Err(IngestError::Validation(ValidationError::MissingColumns { missing, found })) => {
                assert_eq!(missing, vec!["date_op"]);
                assert_eq!(found, vec!["Libellé", "Montant"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn script_body_is_rejected() {
        let data = "Date,Description,Montant\n15/01/2024,<script>alert(1)</script>,-1\n";
        assert!(matches!(
            ingest("x.csv", data.as_bytes(), &settings(), &EmptyLedger),
            Err(IngestError::Security(SecurityRejection::SuspiciousContent { .. }))
        ));
    }

    fn workbook(rows: &[[&str; 3]]) -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, cells) in rows.iter().enumerate() {
            for (c, value) in cells.iter().enumerate() {
                sheet.write_string(r as u32, c as u16, *value).unwrap();
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn script_cell_in_workbook_is_rejected() {
        let data = workbook(&[
            ["Date", "Libellé", "Montant"],
            ["15/01/2024", "<script>alert(1)</script>", "-12,50"],
        ]);
        assert!(matches!(
            ingest("x.xlsx", &data, &settings(), &EmptyLedger),
            Err(IngestError::Security(SecurityRejection::SuspiciousContent { .. }))
        ));
    }

    #[test]
    fn workbook_rows_report_sheet_lines() {
        let data = workbook(&[
            ["Date", "Libellé", "Montant"],
            ["15/01/2024", "CB POKAWA", "-12,50"],
            ["16/01/2024", "MONOP", "n/a"],
            ["17/01/2024", "PRLV EDF", "-40"],
        ]);
        let outcome = ingest("releve.xlsx", &data, &settings(), &EmptyLedger).unwrap();
        assert_eq!(outcome.batch.row_count, 2);
        assert_eq!(outcome.batch.encoding, "spreadsheet");
        assert_eq!(outcome.batch.delimiter, None);
        assert!(outcome.batch.warnings[0].contains("line 3"));
    }

    #[test]
    fn header_only_has_no_data_rows() {
        let data = "Date,Description,Montant\n";
        assert!(matches!(
            ingest("x.csv", data.as_bytes(), &settings(), &EmptyLedger),
            Err(IngestError::Validation(ValidationError::NoDataRows))
        ));
    }

    #[test]
    fn skipped_rows_are_warnings() {
        let data = "dateOp;dateVal;label;amount\n\
            2024-02-01;2024-02-01;CARREFOUR VILLENEUVE;-45,67\n\
            2024-02-02;2024-02-02;MONOP;n/a\n\
            2024-03-05;2024-03-05;SNCF;-30\n";
        let outcome = ingest("export.csv", data.as_bytes(), &settings(), &EmptyLedger).unwrap();
        assert_eq!(outcome.batch.row_count, 2);
        assert_eq!(outcome.batch.warnings.len(), 1);
        assert!(outcome.batch.warnings[0].contains("line 3"));
        let months: Vec<String> = outcome
            .batch
            .detected_months
            .iter()
            .map(|m| m.month.to_string())
            .collect();
        assert_eq!(months, vec!["2024-02", "2024-03"]);
        assert_eq!(outcome.batch.delimiter, Some(';'));
    }

    #[test]
    fn latin1_semicolon_export() {
        let data = b"Date op\xE9ration;Libell\xE9;D\xE9bit;Cr\xE9dit\n02/01/2024;PRLV FREE MOBILE;19,99;\n";
        let outcome = ingest("releve.csv", data, &settings(), &EmptyLedger).unwrap();
        assert_eq!(outcome.batch.encoding, "ISO-8859-1");
        assert_eq!(outcome.transactions[0].amount.to_string(), "-19.99");
    }
}
