use std::collections::{BTreeMap, HashSet};

use releve_core::{collapse_whitespace, CanonicalTransaction, Month};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthCount {
    pub month: Month,
    pub transaction_count: usize,
}

/// Rows per calendar month, ascending.
pub fn detect_months(transactions: &[CanonicalTransaction]) -> Vec<MonthCount> {
    let mut counts: BTreeMap<Month, usize> = BTreeMap::new();
    for tx in transactions {
        *counts.entry(tx.month()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(month, transaction_count)| MonthCount {
            month,
            transaction_count,
        })
        .collect()
}

/// Read access to the keys already present in the ledger.
pub trait LedgerLookup {
    fn contains_key(&self, key: &str) -> bool;
}

impl LedgerLookup for HashSet<String> {
    fn contains_key(&self, key: &str) -> bool {
        self.contains(key)
    }
}

/// A ledger with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyLedger;

impl LedgerLookup for EmptyLedger {
    fn contains_key(&self, _key: &str) -> bool {
        false
    }
}

/// Content key of a transaction: SHA-256 hex over date, amount, label and account.
pub fn duplicate_key(tx: &CanonicalTransaction) -> String {
    let label = collapse_whitespace(&tx.label).to_uppercase();
    let material = format!(
        "{}|{:.2}|{}|{}",
        tx.operation_date.format("%Y-%m-%d"),
        tx.amount.round_dp(2),
        label,
        tx.account.as_deref().map(str::trim).unwrap_or("")
    );
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    let hash: [u8; 32] = hasher.finalize().into();
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateRef {
    /// Index into the ingested transactions.
    pub row_index: usize,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    pub duplicate_count: usize,
    pub duplicate_refs: Vec<DuplicateRef>,
    #[serde(skip)]
    rows: HashSet<usize>,
}

impl DuplicateReport {
    pub fn is_duplicate(&self, row_index: usize) -> bool {
        self.rows.contains(&row_index)
    }
}

/// Flags rows whose key already exists in the ledger. Rows are never removed.
pub fn find_duplicates(
    transactions: &[CanonicalTransaction],
    ledger: &dyn LedgerLookup,
) -> DuplicateReport {
    let duplicate_refs: Vec<DuplicateRef> = transactions
        .iter()
        .enumerate()
        .filter_map(|(row_index, tx)| {
            let key = duplicate_key(tx);
            ledger
                .contains_key(&key)
                .then_some(DuplicateRef { row_index, key })
        })
        .collect();
    DuplicateReport {
        duplicate_count: duplicate_refs.len(),
        rows: duplicate_refs.iter().map(|r| r.row_index).collect(),
        duplicate_refs,
    }
}
