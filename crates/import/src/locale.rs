use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_date_iso, r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})$");
re!(re_date_slash, r"^(\d{1,2})/(\d{1,2})/(\d{2}|\d{4})$");
re!(re_date_dash, r"^(\d{1,2})[-.](\d{1,2})[-.](\d{2}|\d{4})$");
re!(re_amount_body, r"^\d+(\.\d+)?$|^\.\d+$");

/// Which of two ambiguous slash-date fields is read as the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateOrder {
    #[default]
    DayFirst,
    MonthFirst,
}

impl DateOrder {
    pub fn from_day_first(day_first: bool) -> Self {
        if day_first {
            DateOrder::DayFirst
        } else {
            DateOrder::MonthFirst
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Amount,
    Date,
}

/// A cell that could not be read; keeps the original text for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unparseable {
    pub kind: FieldKind,
    pub raw: String,
}

impl Unparseable {
    fn amount(raw: &str) -> Self {
        Unparseable {
            kind: FieldKind::Amount,
            raw: raw.to_string(),
        }
    }

    fn date(raw: &str) -> Self {
        Unparseable {
            kind: FieldKind::Date,
            raw: raw.to_string(),
        }
    }
}

impl std::fmt::Display for Unparseable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FieldKind::Amount => write!(f, "unparseable amount '{}'", self.raw),
            FieldKind::Date => write!(f, "unparseable date '{}'", self.raw),
        }
    }
}

const CURRENCY_MARKERS: &[&str] = &["EUR", "USD", "GBP", "CHF", "€", "$", "£"];

/// Parses `1 234,56`, `-45.32`, `1.234,56 €`, `(75.25)`, `12,50-` and friends.
pub fn parse_amount(text: &str) -> Result<Decimal, Unparseable> {
    let raw = text;
    let mut s = text.trim().to_string();
    if s.is_empty() {
        return Err(Unparseable::amount(raw));
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = s[1..s.len() - 1].to_string();
    }

    // Currency may sit on either side of the sign.
    for _ in 0..2 {
        s = strip_currency(s.trim());
        if let Some(rest) = s.strip_prefix('-') {
            negative = !negative;
            s = rest.to_string();
        } else if let Some(rest) = s.strip_prefix('+') {
            s = rest.to_string();
        }
    }
    s = strip_currency(s.trim());
    if let Some(rest) = s.strip_suffix('-') {
        negative = !negative;
        s = rest.to_string();
    }

    let s: String = s
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}' | '\'' | '’'))
        .collect();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return Err(Unparseable::amount(raw));
    }

    let normalized = normalize_separators(&s).ok_or_else(|| Unparseable::amount(raw))?;
    if !re_amount_body().is_match(&normalized) {
        return Err(Unparseable::amount(raw));
    }
    let value = Decimal::from_str(&normalized).map_err(|_| Unparseable::amount(raw))?;
    Ok(if negative { -value } else { value })
}

fn strip_currency(s: &str) -> String {
    let mut out = s.to_string();
    for marker in CURRENCY_MARKERS {
        if let Some(rest) = out.strip_prefix(marker) {
            out = rest.trim_start().to_string();
        }
        if let Some(rest) = out.strip_suffix(marker) {
            out = rest.trim_end().to_string();
        }
    }
    out
}

/// Rewrites digit/`.`/`,` text so that `.` is the only (decimal) separator.
fn normalize_separators(s: &str) -> Option<String> {
    let dots = s.matches('.').count();
    let commas = s.matches(',').count();

    match (dots, commas) {
        (0, 0) => Some(s.to_string()),
        (_, 0) if dots > 1 => grouped(s, '.'),
        (_, 0) => Some(s.to_string()),
        (0, _) if commas > 1 => grouped(s, ','),
        // A lone comma is a decimal comma.
        (0, _) => Some(s.replace(',', ".")),
        _ => {
            let last_dot = s.rfind('.')?;
            let last_comma = s.rfind(',')?;
            let (decimal, thousands) = if last_dot > last_comma {
                ('.', ',')
            } else {
                (',', '.')
            };
            if s.matches(decimal).count() > 1 {
                return None;
            }
            let head = &s[..s.rfind(decimal)?];
            if head.ends_with(thousands) || head.starts_with(thousands) {
                return None;
            }
            Some(s.replace(thousands, "").replace(decimal, "."))
        }
    }
}

/// `1.234.567` / `1,234,567`: every group after the first must be three digits.
fn grouped(s: &str, sep: char) -> Option<String> {
    let mut parts = s.split(sep);
    let first = parts.next()?;
    if first.is_empty() || first.len() > 3 {
        return None;
    }
    let rest: Vec<&str> = parts.collect();
    if rest.iter().any(|p| p.len() != 3) {
        return None;
    }
    Some(s.replace(sep, ""))
}

/// Parses a date: ISO first, then slash dates in `order`, then `DD-MM-YYYY` / `DD.MM.YYYY`.
pub fn parse_date(text: &str, order: DateOrder) -> Result<NaiveDate, Unparseable> {
    let raw = text;
    let token = date_token(text);
    if token.is_empty() {
        return Err(Unparseable::date(raw));
    }

    if let Some(c) = re_date_iso().captures(token) {
        return ymd(&c[1], &c[2], &c[3]).ok_or_else(|| Unparseable::date(raw));
    }

    if let Some(c) = re_date_slash().captures(token) {
        let (a, b, y) = (&c[1], &c[2], &c[3]);
        let (day_first, month_first) = (dmy(a, b, y), dmy(b, a, y));
        let parsed = match order {
            DateOrder::DayFirst => day_first.or(month_first),
            DateOrder::MonthFirst => month_first.or(day_first),
        };
        return parsed.ok_or_else(|| Unparseable::date(raw));
    }

    if let Some(c) = re_date_dash().captures(token) {
        return dmy(&c[1], &c[2], &c[3]).ok_or_else(|| Unparseable::date(raw));
    }

    Err(Unparseable::date(raw))
}

/// Drops a trailing time part: `2024-01-15T10:00:00`, `15/01/2024 10:30`.
fn date_token(text: &str) -> &str {
    let t = text.trim();
    let t = t.split_whitespace().next().unwrap_or("");
    match t.find('T') {
        Some(i) if i >= 8 => &t[..i],
        _ => t,
    }
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

fn dmy(d: &str, m: &str, y: &str) -> Option<NaiveDate> {
    let year = expand_year(y)?;
    NaiveDate::from_ymd_opt(year, m.parse().ok()?, d.parse().ok()?)
}

/// Two-digit years: 00–68 → 20xx, 69–99 → 19xx.
fn expand_year(y: &str) -> Option<i32> {
    let n: i32 = y.parse().ok()?;
    Some(match y.len() {
        2 if n <= 68 => 2000 + n,
        2 => 1900 + n,
        _ => n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── parse_amount ──────────────────────────────────────────────────────────

    #[test]
    fn amount_french_thousands_and_decimal_comma() {
        assert_eq!(parse_amount("1 234,56").unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("1\u{a0}234,56").unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("1\u{202f}234,56").unwrap(), dec("1234.56"));
    }

    #[test]
    fn amount_negative_dot() {
        assert_eq!(parse_amount("-45.32").unwrap(), dec("-45.32"));
    }

    #[test]
    fn amount_mixed_separators() {
        assert_eq!(parse_amount("1.234,56").unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("1,234.56").unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("1'234.50").unwrap(), dec("1234.50"));
    }

    #[test]
    fn amount_lone_comma_is_decimal() {
        assert_eq!(parse_amount("12,5").unwrap(), dec("12.5"));
        assert_eq!(parse_amount("1,234").unwrap(), dec("1.234"));
    }

    #[test]
    fn amount_repeated_separator_is_thousands() {
        assert_eq!(parse_amount("1.234.567").unwrap(), dec("1234567"));
        assert_eq!(parse_amount("1,234,567").unwrap(), dec("1234567"));
        assert!(parse_amount("1,23,4").is_err());
    }

    #[test]
    fn amount_currency_and_signs() {
        assert_eq!(parse_amount("€ 12,00").unwrap(), dec("12.00"));
        assert_eq!(parse_amount("-12,00 €").unwrap(), dec("-12.00"));
        assert_eq!(parse_amount("€-3.10").unwrap(), dec("-3.10"));
        assert_eq!(parse_amount("$99.99").unwrap(), dec("99.99"));
        assert_eq!(parse_amount("+8,40 EUR").unwrap(), dec("8.40"));
        assert_eq!(parse_amount("(75.25)").unwrap(), dec("-75.25"));
        assert_eq!(parse_amount("12,50-").unwrap(), dec("-12.50"));
    }

    #[test]
    fn amount_invalid_keeps_raw_text() {
        let err = parse_amount("douze euros").unwrap_err();
        assert_eq!(err.kind, FieldKind::Amount);
        assert_eq!(err.raw, "douze euros");
        assert!(parse_amount("").is_err());
        assert!(parse_amount("-").is_err());
        assert!(parse_amount("1.2.3,4,5").is_err());
        assert!(parse_amount("12..5").is_err());
    }

    // ── parse_date ────────────────────────────────────────────────────────────

    #[test]
    fn date_iso_first() {
        assert_eq!(parse_date("2024-01-15", DateOrder::DayFirst).unwrap(), date(2024, 1, 15));
        assert_eq!(
            parse_date("2024-01-15T10:30:00", DateOrder::DayFirst).unwrap(),
            date(2024, 1, 15)
        );
        assert_eq!(parse_date("2024/01/15", DateOrder::MonthFirst).unwrap(), date(2024, 1, 15));
    }

    #[test]
    fn date_two_digit_year_day_first() {
        assert_eq!(parse_date("11/12/25", DateOrder::DayFirst).unwrap(), date(2025, 12, 11));
    }

    #[test]
    fn date_month_first_order() {
        assert_eq!(parse_date("11/12/2025", DateOrder::MonthFirst).unwrap(), date(2025, 11, 12));
    }

    #[test]
    fn date_falls_back_when_preferred_order_is_invalid() {
        // 13 cannot be a month
        assert_eq!(parse_date("01/13/2024", DateOrder::DayFirst).unwrap(), date(2024, 1, 13));
        assert_eq!(parse_date("13/01/2024", DateOrder::MonthFirst).unwrap(), date(2024, 1, 13));
    }

    #[test]
    fn date_dash_and_dot() {
        assert_eq!(parse_date("15-01-2024", DateOrder::DayFirst).unwrap(), date(2024, 1, 15));
        assert_eq!(parse_date("15.01.2024", DateOrder::DayFirst).unwrap(), date(2024, 1, 15));
        assert_eq!(parse_date("15/01/2024 08:12", DateOrder::DayFirst).unwrap(), date(2024, 1, 15));
    }

    #[test]
    fn date_two_digit_year_pivot() {
        assert_eq!(parse_date("01/01/69", DateOrder::DayFirst).unwrap(), date(1969, 1, 1));
        assert_eq!(parse_date("01/01/68", DateOrder::DayFirst).unwrap(), date(2068, 1, 1));
    }

    #[test]
    fn date_calendar_invalid_is_rejected() {
        assert!(parse_date("31/02/2024", DateOrder::DayFirst).is_err());
        assert!(parse_date("2023-02-29", DateOrder::DayFirst).is_err());
        assert!(parse_date("32/13/2024", DateOrder::DayFirst).is_err());
        assert_eq!(parse_date("29/02/2024", DateOrder::DayFirst).unwrap(), date(2024, 2, 29));
    }

    #[test]
    fn date_garbage_keeps_raw_text() {
        let err = parse_date("demain", DateOrder::DayFirst).unwrap_err();
        assert_eq!(err.kind, FieldKind::Date);
        assert_eq!(err.raw, "demain");
        assert!(parse_date("", DateOrder::DayFirst).is_err());
    }
}
