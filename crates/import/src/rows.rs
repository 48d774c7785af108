use releve_core::{CanonicalTransaction, RawRow};
use rust_decimal::Decimal;

use crate::error::{RowIssue, ValidationError};
use crate::locale::{self, DateOrder};

/// Most row issues carried by a validation error.
pub const MAX_REPORTED_ISSUES: usize = 20;

/// Rows converted to transactions plus what was skipped along the way.
#[derive(Debug, Clone, Default)]
pub struct ParsedRows {
    pub transactions: Vec<CanonicalTransaction>,
    pub issues: Vec<RowIssue>,
    pub warnings: Vec<String>,
    /// Data rows seen, valid or not.
    pub total: usize,
}

impl ParsedRows {
    pub fn invalid(&self) -> usize {
        self.total - self.transactions.len()
    }
}

/// Converts rows keyed by canonical column names. Bad rows become issues, never errors.
///
/// `lines[i]` is the source line of `rows[i]`; rows beyond it are numbered
/// as if each sat on its own line after a one-line header.
pub fn parse_rows(rows: &[RawRow], lines: &[usize], order: DateOrder) -> ParsedRows {
    let mut parsed = ParsedRows {
        total: rows.len(),
        ..Default::default()
    };
    for (index, row) in rows.iter().enumerate() {
        let line = lines.get(index).copied().unwrap_or(index + 2);
        match parse_row(row, order, line) {
            Ok(tx) => parsed.transactions.push(tx),
            Err(issue) => {
                tracing::warn!(line, field = %issue.field, reason = %issue.reason, "row skipped");
                parsed.warnings.push(format!("Row skipped: {issue}"));
                parsed.issues.push(issue);
            }
        }
    }
    parsed
}

fn parse_row(row: &RawRow, order: DateOrder, line: usize) -> Result<CanonicalTransaction, RowIssue> {
    let issue = |field: &str, value: &str, reason: String| RowIssue {
        line,
        field: field.to_string(),
        value: value.to_string(),
        reason,
    };

    let raw_date = row.get_nonblank("date_op").unwrap_or("");
    let operation_date = locale::parse_date(raw_date, order)
        .map_err(|e| issue("date_op", raw_date, e.to_string()))?;

    let label = row.get_nonblank("label").unwrap_or("");
    if label.is_empty() {
        return Err(issue("label", "", "empty label".to_string()));
    }

    let amount = row_amount(row).map_err(|(field, raw, reason)| issue(field, &raw, reason))?;

    // A bad value date is not worth losing the row for.
    let value_date = row
        .get_nonblank("date_valeur")
        .and_then(|raw| locale::parse_date(raw, order).ok());

    let owned = |key: &str| row.get_nonblank(key).map(str::to_string);

    Ok(CanonicalTransaction::new(operation_date, label, amount)
        .with_value_date(value_date)
        .with_account(owned("account"))
        .with_category(owned("category"), owned("subcategory")))
}

/// `amount` when present, otherwise `credit - |debit|`.
fn row_amount(row: &RawRow) -> Result<Decimal, (&'static str, String, String)> {
    let parse = |field: &'static str, raw: &str| {
        locale::parse_amount(raw).map_err(|e| (field, raw.to_string(), e.to_string()))
    };

    if let Some(raw) = row.get_nonblank("amount") {
        return parse("amount", raw);
    }

    let debit = row.get_nonblank("debit").map(|raw| parse("debit", raw)).transpose()?;
    let credit = row.get_nonblank("credit").map(|raw| parse("credit", raw)).transpose()?;
    match (debit, credit) {
        (None, None) => Err(("amount", String::new(), "no amount".to_string())),
        (debit, credit) => {
            Ok(credit.unwrap_or_default() - debit.map(|d| d.abs()).unwrap_or_default())
        }
    }
}

/// Applies file-level tolerance to a parse result.
pub fn check_tolerance(parsed: &ParsedRows, max_invalid_ratio: f32) -> Result<(), ValidationError> {
    if parsed.total == 0 {
        return Err(ValidationError::NoDataRows);
    }
    let reported = || {
        parsed
            .issues
            .iter()
            .take(MAX_REPORTED_ISSUES)
            .cloned()
            .collect::<Vec<_>>()
    };
    if parsed.transactions.is_empty() {
        return Err(ValidationError::NoResolvableMonths { issues: reported() });
    }
    let ratio = parsed.invalid() as f32 / parsed.total as f32;
    if ratio > max_invalid_ratio {
        return Err(ValidationError::TooManyInvalidRows {
            invalid: parsed.invalid(),
            total: parsed.total,
            issues: reported(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn row(fields: &[(&str, &str)]) -> RawRow {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn converts_a_full_row() {
        let rows = vec![row(&[
            ("date_op", "15/01/2024"),
            ("date_valeur", "17/01/2024"),
            ("label", "CB POKAWA NATION"),
            ("amount", "-12,50"),
            ("account", "Compte courant"),
            ("category", "Alimentation"),
            ("subcategory", "Restaurant"),
        ])];
        let parsed = parse_rows(&rows, &[], DateOrder::DayFirst);
        assert_eq!(parsed.invalid(), 0);
        let tx = &parsed.transactions[0];
        assert_eq!(tx.operation_date.to_string(), "2024-01-15");
        assert_eq!(tx.value_date.map(|d| d.to_string()).as_deref(), Some("2024-01-17"));
        assert_eq!(tx.amount, dec("-12.50"));
        assert_eq!(tx.account.as_deref(), Some("Compte courant"));
        assert_eq!(tx.subcategory.as_deref(), Some("Restaurant"));
        assert_eq!(tx.month().to_string(), "2024-01");
    }

    #[test]
    fn split_debit_credit_columns() {
        let rows = vec![
            row(&[("date_op", "2024-01-02"), ("label", "EDF"), ("debit", "40,00"), ("credit", "")]),
            row(&[("date_op", "2024-01-03"), ("label", "SALAIRE"), ("debit", ""), ("credit", "2 100,00")]),
            row(&[("date_op", "2024-01-04"), ("label", "FRAIS"), ("debit", "-3,00"), ("credit", "")]),
        ];
        let parsed = parse_rows(&rows, &[], DateOrder::DayFirst);
        let amounts: Vec<Decimal> = parsed.transactions.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![dec("-40"), dec("2100"), dec("-3")]);
    }

    #[test]
    fn bad_rows_become_issues_with_lines() {
        let rows = vec![
            row(&[("date_op", "15/01/2024"), ("label", "OK"), ("amount", "1")]),
            row(&[("date_op", "31/02/2024"), ("label", "BAD DATE"), ("amount", "1")]),
            row(&[("date_op", "16/01/2024"), ("label", "  "), ("amount", "1")]),
            row(&[("date_op", "16/01/2024"), ("label", "BAD AMOUNT"), ("amount", "abc")]),
        ];
        let parsed = parse_rows(&rows, &[], DateOrder::DayFirst);
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(parsed.invalid(), 3);
        assert_eq!(parsed.issues[0].line, 3);
        assert_eq!(parsed.issues[0].field, "date_op");
        assert_eq!(parsed.issues[0].value, "31/02/2024");
        assert_eq!(parsed.issues[1].field, "label");
        assert_eq!(parsed.issues[2].value, "abc");
        assert_eq!(parsed.warnings.len(), 3);
    }

    #[test]
    fn issues_carry_the_recorded_source_line() {
        let rows = vec![
            row(&[("date_op", "15/01/2024"), ("label", "OK"), ("amount", "1")]),
            row(&[("date_op", "16/01/2024"), ("label", "BAD"), ("amount", "n/a")]),
        ];
        let parsed = parse_rows(&rows, &[2, 7], DateOrder::DayFirst);
        assert_eq!(parsed.issues[0].line, 7);
        assert!(parsed.warnings[0].contains("line 7"));
    }

    #[test]
    fn unparseable_value_date_is_dropped_not_fatal() {
        let rows = vec![row(&[
            ("date_op", "15/01/2024"),
            ("date_valeur", "soon"),
            ("label", "X"),
            ("amount", "1"),
        ])];
        let parsed = parse_rows(&rows, &[], DateOrder::DayFirst);
        assert_eq!(parsed.transactions[0].value_date, None);
    }

    // ── check_tolerance ──

    #[test]
    fn tolerance_outcomes() {
        let empty = ParsedRows::default();
        assert!(matches!(check_tolerance(&empty, 0.5), Err(ValidationError::NoDataRows)));

        let none_valid = parse_rows(
            &[row(&[("date_op", "never"), ("label", "X"), ("amount", "1")])],
            &[],
            DateOrder::DayFirst,
        );
        assert!(matches!(
            check_tolerance(&none_valid, 0.5),
            Err(ValidationError::NoResolvableMonths { .. })
        ));

        let mostly_bad = parse_rows(
            &[
                row(&[("date_op", "2024-01-01"), ("label", "X"), ("amount", "1")]),
                row(&[("date_op", "bad"), ("label", "X"), ("amount", "1")]),
                row(&[("date_op", "bad"), ("label", "X"), ("amount", "1")]),
            ],
            &[],
            DateOrder::DayFirst,
        );
        match check_tolerance(&mostly_bad, 0.5) {
            Err(ValidationError::TooManyInvalidRows { invalid, total, issues }) => {
                assert_eq!((invalid, total), (2, 3));
                assert_eq!(issues.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_tolerance(&mostly_bad, 0.7).is_ok());
    }

    #[test]
    fn reported_issues_are_capped() {
        let rows: Vec<RawRow> = (0..30)
            .map(|_| row(&[("date_op", "bad"), ("label", "X"), ("amount", "1")]))
            .chain(std::iter::once(row(&[("date_op", "2024-01-01"), ("label", "X"), ("amount", "1")])))
            .collect();
        let parsed = parse_rows(&rows, &[], DateOrder::DayFirst);
        match check_tolerance(&parsed, 0.5) {
            Err(ValidationError::TooManyInvalidRows { issues, .. }) => {
                assert_eq!(issues.len(), MAX_REPORTED_ISSUES)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
