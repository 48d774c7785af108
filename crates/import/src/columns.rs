pub use releve_core::fold_accents;
use releve_core::RawRow;
use serde::Serialize;
use std::fmt;

use crate::error::ValidationError;

/// Target columns of the ledger schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalColumn {
    DateOp,
    DateValeur,
    Label,
    Amount,
    Debit,
    Credit,
    Account,
    Category,
    Subcategory,
}

impl CanonicalColumn {
    pub fn key(self) -> &'static str {
        match self {
            CanonicalColumn::DateOp => "date_op",
            CanonicalColumn::DateValeur => "date_valeur",
            CanonicalColumn::Label => "label",
            CanonicalColumn::Amount => "amount",
            CanonicalColumn::Debit => "debit",
            CanonicalColumn::Credit => "credit",
            CanonicalColumn::Account => "account",
            CanonicalColumn::Category => "category",
            CanonicalColumn::Subcategory => "subcategory",
        }
    }
}

impl fmt::Display for CanonicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Known header spellings, already in normalized form.
const SYNONYMS: &[(&str, CanonicalColumn)] = &[
    ("date", CanonicalColumn::DateOp),
    ("date op", CanonicalColumn::DateOp),
    ("date operation", CanonicalColumn::DateOp),
    ("date de operation", CanonicalColumn::DateOp),
    ("date d operation", CanonicalColumn::DateOp),
    ("date de l operation", CanonicalColumn::DateOp),
    ("operation date", CanonicalColumn::DateOp),
    ("transaction date", CanonicalColumn::DateOp),
    ("date transaction", CanonicalColumn::DateOp),
    ("booking date", CanonicalColumn::DateOp),
    ("posting date", CanonicalColumn::DateOp),
    ("date comptable", CanonicalColumn::DateOp),
    ("date de comptabilisation", CanonicalColumn::DateOp),
    ("date valeur", CanonicalColumn::DateValeur),
    ("date de valeur", CanonicalColumn::DateValeur),
    ("date val", CanonicalColumn::DateValeur),
    ("value date", CanonicalColumn::DateValeur),
    ("libelle", CanonicalColumn::Label),
    ("libelle operation", CanonicalColumn::Label),
    ("libelle simplifie", CanonicalColumn::Label),
    ("libelle de l operation", CanonicalColumn::Label),
    ("label", CanonicalColumn::Label),
    ("description", CanonicalColumn::Label),
    ("intitule", CanonicalColumn::Label),
    ("designation", CanonicalColumn::Label),
    ("wording", CanonicalColumn::Label),
    ("details", CanonicalColumn::Label),
    ("payee", CanonicalColumn::Label),
    ("montant", CanonicalColumn::Amount),
    ("montant eur", CanonicalColumn::Amount),
    ("montant euros", CanonicalColumn::Amount),
    ("montant de l operation", CanonicalColumn::Amount),
    ("amount", CanonicalColumn::Amount),
    ("somme", CanonicalColumn::Amount),
    ("debit", CanonicalColumn::Debit),
    ("debit eur", CanonicalColumn::Debit),
    ("debit euros", CanonicalColumn::Debit),
    ("montant debit", CanonicalColumn::Debit),
    ("withdrawal", CanonicalColumn::Debit),
    ("credit", CanonicalColumn::Credit),
    ("credit eur", CanonicalColumn::Credit),
    ("credit euros", CanonicalColumn::Credit),
    ("montant credit", CanonicalColumn::Credit),
    ("deposit", CanonicalColumn::Credit),
    ("compte", CanonicalColumn::Account),
    ("account", CanonicalColumn::Account),
    ("account label", CanonicalColumn::Account),
    ("libelle compte", CanonicalColumn::Account),
    ("nom du compte", CanonicalColumn::Account),
    ("categorie", CanonicalColumn::Category),
    ("category", CanonicalColumn::Category),
    ("category parent", CanonicalColumn::Category),
    ("categorie parent", CanonicalColumn::Category),
    ("sous categorie", CanonicalColumn::Subcategory),
    ("subcategory", CanonicalColumn::Subcategory),
    ("sub category", CanonicalColumn::Subcategory),
];

/// `"Date Opération"` → `"date operation"`, `"dateOp"` → `"date op"`.
pub fn normalize_header(header: &str) -> String {
    let mut spaced = String::with_capacity(header.len() + 4);
    let mut prev_lower = false;
    for c in fold_accents(header.trim()).chars() {
        if c.is_uppercase() && prev_lower {
            spaced.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        spaced.push(c);
    }
    spaced
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps one header to a canonical column, synonyms first then keyword heuristics.
pub fn canonical_for(header: &str) -> Option<CanonicalColumn> {
    let norm = normalize_header(header);
    if norm.is_empty() {
        return None;
    }
    if let Some((_, col)) = SYNONYMS.iter().find(|(s, _)| *s == norm) {
        return Some(*col);
    }

    let words: Vec<&str> = norm.split(' ').collect();
    let has = |w: &str| words.contains(&w);
    if has("date") && (has("valeur") || has("value") || has("val")) {
        Some(CanonicalColumn::DateValeur)
    } else if has("date") {
        Some(CanonicalColumn::DateOp)
    } else if has("libelle") || has("description") || has("label") {
        Some(CanonicalColumn::Label)
    } else if has("montant") || has("amount") {
        Some(CanonicalColumn::Amount)
    } else {
        None
    }
}

/// Resolved header → key assignment for a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Output key for each input header, same order.
    keys: Vec<String>,
    resolved: Vec<CanonicalColumn>,
}

impl ColumnMapping {
    /// First header resolving to a canonical column wins; the rest keep their normalized name.
    pub fn from_headers(headers: &[String]) -> Self {
        let mut resolved = Vec::new();
        let mut keys = Vec::with_capacity(headers.len());
        for header in headers {
            match canonical_for(header) {
                Some(col) if !resolved.contains(&col) => {
                    resolved.push(col);
                    keys.push(col.key().to_string());
                }
                _ => keys.push(normalize_header(header).replace(' ', "_")),
            }
        }
        ColumnMapping { keys, resolved }
    }

    pub fn has(&self, col: CanonicalColumn) -> bool {
        self.resolved.contains(&col)
    }

    pub fn key_for(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    /// Canonical columns a ledger import cannot do without.
    pub fn missing_required(&self) -> Vec<CanonicalColumn> {
        let mut missing = Vec::new();
        if !self.has(CanonicalColumn::DateOp) {
            missing.push(CanonicalColumn::DateOp);
        }
        if !self.has(CanonicalColumn::Label) {
            missing.push(CanonicalColumn::Label);
        }
        if !self.has(CanonicalColumn::Amount)
            && !self.has(CanonicalColumn::Debit)
            && !self.has(CanonicalColumn::Credit)
        {
            missing.push(CanonicalColumn::Amount);
        }
        missing
    }
}

/// Resolves headers, failing with the missing fields and the headers actually present.
pub fn resolve_columns(headers: &[String]) -> Result<ColumnMapping, ValidationError> {
    let mapping = ColumnMapping::from_headers(headers);
    let missing = mapping.missing_required();
    if missing.is_empty() {
        Ok(mapping)
    } else {
        Err(ValidationError::MissingColumns {
            missing: missing.iter().map(|c| c.key().to_string()).collect(),
            found: headers.to_vec(),
        })
    }
}

/// Rewrites row keys to canonical names; unmapped columns keep their normalized name.
pub fn normalize_columns(rows: &[RawRow]) -> Vec<RawRow> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let headers: Vec<String> = first.names().map(str::to_string).collect();
    let mapping = ColumnMapping::from_headers(&headers);
    rows.iter().map(|row| apply_mapping(&mapping, row)).collect()
}

pub fn apply_mapping(mapping: &ColumnMapping, row: &RawRow) -> RawRow {
    row.iter()
        .enumerate()
        .map(|(i, (name, value))| {
            let key = mapping
                .key_for(i)
                .map(str::to_string)
                .unwrap_or_else(|| normalize_header(name).replace(' ', "_"));
            (key, value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn header_normalization() {
        assert_eq!(normalize_header("Date Opération"), "date operation");
        assert_eq!(normalize_header("dateOp"), "date op");
        assert_eq!(normalize_header("accountLabel"), "account label");
        assert_eq!(normalize_header("  Libellé  simplifié "), "libelle simplifie");
        assert_eq!(normalize_header("Montant (EUR)"), "montant eur");
        assert_eq!(normalize_header("Date_de_valeur"), "date de valeur");
    }

    #[test]
    fn synonyms() {
        assert_eq!(canonical_for("Date Opération"), Some(CanonicalColumn::DateOp));
        assert_eq!(canonical_for("dateOp"), Some(CanonicalColumn::DateOp));
        assert_eq!(canonical_for("dateVal"), Some(CanonicalColumn::DateValeur));
        assert_eq!(canonical_for("Description"), Some(CanonicalColumn::Label));
        assert_eq!(canonical_for("Compte"), Some(CanonicalColumn::Account));
        assert_eq!(canonical_for("accountLabel"), Some(CanonicalColumn::Account));
        assert_eq!(canonical_for("Montant"), Some(CanonicalColumn::Amount));
        assert_eq!(canonical_for("Débit euros"), Some(CanonicalColumn::Debit));
        assert_eq!(canonical_for("Sous-catégorie"), Some(CanonicalColumn::Subcategory));
    }

    #[test]
    fn keyword_heuristics() {
        assert_eq!(canonical_for("Date de l'opé."), Some(CanonicalColumn::DateOp));
        assert_eq!(canonical_for("Date valeur opé"), Some(CanonicalColumn::DateValeur));
        assert_eq!(canonical_for("Libellé complet"), Some(CanonicalColumn::Label));
        assert_eq!(canonical_for("Montant total"), Some(CanonicalColumn::Amount));
        assert_eq!(canonical_for("Solde"), None);
        assert_eq!(canonical_for("   "), None);
    }

    #[test]
    fn mapping_first_wins_and_preserves_unknown() {
        let mapping = ColumnMapping::from_headers(&headers(&[
            "dateOp",
            "dateVal",
            "label",
            "category",
            "categoryParent",
            "amount",
            "accountbalance",
        ]));
        assert_eq!(mapping.key_for(0), Some("date_op"));
        assert_eq!(mapping.key_for(1), Some("date_valeur"));
        assert_eq!(mapping.key_for(3), Some("category"));
        assert_eq!(mapping.key_for(4), Some("category_parent"));
        assert_eq!(mapping.key_for(6), Some("accountbalance"));
        assert!(mapping.missing_required().is_empty());
    }

    #[test]
    fn missing_date_lists_found_headers() {
        let err = resolve_columns(&headers(&["Libellé", "Montant", "Solde"])).unwrap_err();
        match err {
            ValidationError::MissingColumns { missing, found } => {
                assert_eq!(missing, vec!["date_op"]);
                assert_eq!(found, vec!["Libellé", "Montant", "Solde"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn debit_credit_satisfy_amount() {
        let mapping = resolve_columns(&headers(&["Date", "Libellé", "Débit", "Crédit"])).unwrap();
        assert!(mapping.has(CanonicalColumn::Debit));
        assert!(mapping.has(CanonicalColumn::Credit));
        assert!(!mapping.has(CanonicalColumn::Amount));
    }

    #[test]
    fn normalize_columns_renames_rows() {
        let mut row = RawRow::new();
        row.push("Date Opération", "15/01/2024");
        row.push("Libellé", "CB POKAWA");
        row.push("Montant", "-12,50");
        row.push("Solde Après", "100,00");
        let rows = normalize_columns(&[row]);
        assert_eq!(rows[0].get("date_op"), Some("15/01/2024"));
        assert_eq!(rows[0].get("label"), Some("CB POKAWA"));
        assert_eq!(rows[0].get("amount"), Some("-12,50"));
        assert_eq!(rows[0].get("solde_apres"), Some("100,00"));
        assert!(normalize_columns(&[]).is_empty());
    }
}
