use std::sync::OnceLock;

use regex::Regex;
use releve_core::{collapse_whitespace, fold_accents};

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// Payment-method prefixes, plus any qualifier words right behind them.
re!(
    re_prefix,
    r"^(?:CB|CARTE|PRLV|PRELEVEMENT|PRELEV|VIR|VIREMENT|SEPA|CHQ|CHEQUE|RETRAIT|DAB|PAIEMENT|PAIEMT|ACHAT)(?:\*\d+)?\b\**\s*(?:(?:TIP|INSTANTANE|INST|FACTURE|FACT|EMIS|RECU|POS|ATM)\b\**\s*)*"
);
// Qualifier words can also be merchant names, so on their own they only go
// when a marker, a number or a payment prefix follows.
re!(
    re_qualifier_marked,
    r"^(?:TIP|INSTANTANE|INST|FACTURE|FACT|EMIS|RECU|POS|ATM)(?:\*+\s*|\s*:\s*)"
);
re!(
    re_qualifier_before,
    r"^(?:TIP|INSTANTANE|INST|FACTURE|FACT|EMIS|RECU|POS|ATM)\s+(\d|(?:CB|CARTE|PRLV|PRELEVEMENT|PRELEV|VIR|VIREMENT|SEPA|CHQ|CHEQUE|RETRAIT|DAB|PAIEMENT|PAIEMT|ACHAT)\b)"
);
re!(
    re_date,
    r"\b(?:DU\s+)?\d{1,2}/\d{1,2}(?:/\d{2,4})?\b|\bDU\s+\d{6,8}\b"
);
re!(re_time, r"\b\d{1,2}H\d{2}\b");
re!(re_card, r"\bX+\d{3,}\b|\*+\d{3,}\b|\b\d{6,}\b");
re!(re_trailing_number, r"\s+[+-]?\d+(?:[.,]\d{1,2})?(?:\s*(?:EUR|€))?$");
re!(re_punct, r"[^A-Z0-9 ]+");

/// One stripping pass.
fn strip_once(s: &str) -> String {
    let s = collapse_whitespace(s);
    let s = re_prefix().replace(&s, "");
    let s = re_qualifier_marked().replace(&s, "");
    let s = re_qualifier_before().replace(&s, "$1");
    let s = re_date().replace_all(&s, " ");
    let s = re_time().replace_all(&s, " ");
    let s = re_card().replace_all(&s, " ");
    let s = re_trailing_number().replace(s.trim_end(), "");
    let s = re_punct().replace_all(&s, " ");
    collapse_whitespace(&s)
}

/// Reduces a bank label to a stable merchant key.
///
/// `"CB POKAWA NATION 75011"` → `"POKAWA NATION"`. Stripping runs to a
/// fixpoint so the function is idempotent. A label that strips to nothing
/// keeps its upper-cased, whitespace-collapsed form.
pub fn normalize_merchant(label: &str) -> String {
    let upper = collapse_whitespace(&fold_accents(&label.to_uppercase()));
    let mut current = upper.clone();
    loop {
        let next = strip_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    if current.is_empty() {
        upper
    } else {
        current
    }
}

/// Whitespace tokens of a key.
pub fn tokens(key: &str) -> impl Iterator<Item = &str> {
    key.split_whitespace()
}
