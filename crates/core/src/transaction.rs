use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::period::Month;

/// One row of an uploaded table, column name → cell text, in file order.
///
/// Lives only between reading the file and resolving canonical columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field. Existing names are kept; lookups return the first.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Like `get`, but treats blank cells as absent.
    pub fn get_nonblank(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.trim().is_empty())
    }
}

impl FromIterator<(String, String)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        RawRow {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A ledger line in canonical form. Negative amounts are debits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TransactionRecord")]
pub struct CanonicalTransaction {
    pub operation_date: NaiveDate,
    pub value_date: Option<NaiveDate>,
    pub label: String,
    pub amount: Decimal,
    pub account: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    month: Month,
}

impl CanonicalTransaction {
    pub fn new(operation_date: NaiveDate, label: impl Into<String>, amount: Decimal) -> Self {
        CanonicalTransaction {
            operation_date,
            value_date: None,
            label: label.into(),
            amount,
            account: None,
            category: None,
            subcategory: None,
            month: Month::from_date(operation_date),
        }
    }

    pub fn with_value_date(mut self, value_date: Option<NaiveDate>) -> Self {
        self.value_date = value_date;
        self
    }

    pub fn with_account(mut self, account: Option<String>) -> Self {
        self.account = account;
        self
    }

    pub fn with_category(mut self, category: Option<String>, subcategory: Option<String>) -> Self {
        self.category = category;
        self.subcategory = subcategory;
        self
    }

    /// Always `operation_date` truncated to year-month.
    pub fn month(&self) -> Month {
        self.month
    }

    pub fn is_debit(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }
}

/// Wire form; `month` is recomputed on the way in.
#[derive(Deserialize)]
struct TransactionRecord {
    operation_date: NaiveDate,
    value_date: Option<NaiveDate>,
    label: String,
    amount: Decimal,
    account: Option<String>,
    category: Option<String>,
    #[serde(default)]
    subcategory: Option<String>,
}

impl From<TransactionRecord> for CanonicalTransaction {
    fn from(r: TransactionRecord) -> Self {
        CanonicalTransaction::new(r.operation_date, r.label, r.amount)
            .with_value_date(r.value_date)
            .with_account(r.account)
            .with_category(r.category, r.subcategory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_is_derived_from_operation_date() {
        let tx = CanonicalTransaction::new(date(2024, 1, 31), "POKAWA", dec("-12.50"))
            .with_value_date(Some(date(2024, 2, 2)));
        assert_eq!(tx.month().to_string(), "2024-01");
    }

    #[test]
    fn deserialize_recomputes_month() {
        let json = r#"{"operation_date":"2024-03-05","value_date":null,"label":"X",
            "amount":"-3.20","account":null,"category":null,"month":"1999-01"}"#;
        let tx: CanonicalTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.month().to_string(), "2024-03");
    }

    #[test]
    fn debit_sign() {
        assert!(CanonicalTransaction::new(date(2024, 1, 1), "A", dec("-1")).is_debit());
        assert!(!CanonicalTransaction::new(date(2024, 1, 1), "B", dec("1")).is_debit());
        assert!(!CanonicalTransaction::new(date(2024, 1, 1), "C", dec("0")).is_debit());
    }

    #[test]
    fn builder_setters() {
        let tx = CanonicalTransaction::new(date(2024, 5, 4), "EDF", dec("-80"))
            .with_account(Some("Compte courant".to_string()))
            .with_category(Some("Logement".to_string()), Some("Energie".to_string()));
        assert_eq!(tx.account.as_deref(), Some("Compte courant"));
        assert_eq!(tx.category.as_deref(), Some("Logement"));
        assert_eq!(tx.subcategory.as_deref(), Some("Energie"));
    }

    #[test]
    fn raw_row_keeps_order_and_first_duplicate() {
        let mut row = RawRow::new();
        row.push("Date", "01/01/2024");
        row.push("Libellé", "CB POKAWA");
        row.push("Date", "02/01/2024");
        assert_eq!(row.get("Date"), Some("01/01/2024"));
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["Date", "Libellé", "Date"]);
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn raw_row_blank_handling() {
        let row: RawRow = vec![
            ("a".to_string(), "  ".to_string()),
            ("b".to_string(), String::new()),
        ]
        .into_iter()
        .collect();
        assert!(row.is_blank());
        assert_eq!(row.get_nonblank("a"), None);
        assert_eq!(row.get("a"), Some("  "));
    }
}
