use std::collections::HashMap;

use regex::Regex;
use releve_core::{collapse_whitespace, fold_accents, ExpenseType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::util::edit_ratio;

/// Words that mark contractual, recurring spending.
pub const FIXED_TERMS: &[&str] = &[
    "PRLV", "PRELEVEMENT", "ABONNEMENT", "ABO", "LOYER", "ECHEANCE", "ECHEANCIER", "MENSUALITE",
    "MENSUEL", "COTISATION", "FORFAIT", "ASSURANCE", "MUTUELLE", "PRET", "CREDIT IMMO", "IMPOT",
    "IMPOTS", "TAXE", "FONCIERE", "SYNDIC", "CRECHE",
];

/// Words that mark discretionary, one-off spending.
pub const VARIABLE_TERMS: &[&str] = &[
    "CB", "CARTE", "ACHAT", "PAIEMENT", "RETRAIT", "DAB", "RESTAURANT", "COURSES", "MAGASIN",
    "SUPERMARCHE", "BOUTIQUE", "MARCHE", "BAR", "CINEMA",
];

/// Tags whose spending is typically contractual.
const FIXED_TAGS: &[&str] = &["logement", "abonnement", "assurance"];
/// Tags whose spending is typically discretionary.
const VARIABLE_TAGS: &[&str] = &["alimentation", "restaurant", "transport", "shopping", "sante", "loisirs"];

const TERM_WEIGHT: f32 = 0.5;
const TAG_SEMANTIC_WEIGHT: f32 = 0.4;
const LARGE_AMOUNT_WEIGHT: f32 = 0.3;
const ROUND_AMOUNT_WEIGHT: f32 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRule {
    pub tag: String,
    pub priority: i32,
    pub pattern: String,
    pub match_type: MatchType,
    /// Contribution to the tag score when the rule fires, 0.0–1.0.
    pub weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MatchType {
    /// Whole word or phrase.
    #[default]
    Word,
    Contains,
    Exact,
    Regex,
    /// Any single word within the edit-ratio threshold.
    Fuzzy {
        threshold: f32,
    },
}

impl std::str::FromStr for MatchType {
    type Err = String;

    /// `word`, `contains`, `exact`, `regex` or `fuzzy:<threshold>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if let Some(threshold) = lowered.strip_prefix("fuzzy:") {
            return threshold
                .parse()
                .map(|threshold| MatchType::Fuzzy { threshold })
                .map_err(|_| format!("Invalid fuzzy threshold in '{s}'"));
        }
        Ok(match lowered.as_str() {
            "word" => MatchType::Word,
            "contains" => MatchType::Contains,
            "exact" => MatchType::Exact,
            "regex" => MatchType::Regex,
            _ => return Err(format!("Unknown match type: '{s}'")),
        })
    }
}

/// A tag with its accumulated keyword score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagHit {
    pub tag: String,
    /// Capped at 1.0.
    pub score: f32,
    pub keywords: Vec<String>,
    #[serde(skip)]
    priority: i32,
}

/// Weighted leanings toward each expense type, with what triggered them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpenseSignal {
    pub fixed: f32,
    pub variable: f32,
    pub reasons: Vec<String>,
}

impl ExpenseSignal {
    /// 0.0 when balanced or silent, 1.0 when one side is uncontested.
    pub fn margin(&self) -> f32 {
        let total = self.fixed + self.variable;
        if total <= 0.0 {
            0.0
        } else {
            (self.fixed - self.variable).abs() / total
        }
    }

    pub fn expense_type(&self) -> ExpenseType {
        if self.fixed > self.variable {
            ExpenseType::Fixed
        } else {
            ExpenseType::Variable
        }
    }
}

/// Everything the keyword rules saw in one label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeywordSignal {
    /// Best first.
    pub tags: Vec<TagHit>,
    pub expense: ExpenseSignal,
}

impl KeywordSignal {
    pub fn primary(&self) -> Option<&TagHit> {
        self.tags.first()
    }

    /// Combined evidence in `[0, 1]`: mostly the tag score, partly the expense margin.
    pub fn strength(&self) -> f32 {
        let tag = self.primary().map_or(0.0, |t| t.score);
        (0.7 * tag + 0.3 * self.expense.margin()).clamp(0.0, 1.0)
    }
}

/// A rule ready to run; `Regex` rules carry their compiled pattern.
struct PreparedRule {
    rule: TagRule,
    regex: Option<Regex>,
}

/// Keyword tagging plus fixed/variable heuristics, used when no learned pattern matches.
pub struct KeywordRuleEngine {
    rules: Vec<PreparedRule>,
    /// Absolute amount from which a debit leans FIXED.
    large_amount: Decimal,
}

impl Default for KeywordRuleEngine {
    fn default() -> Self {
        Self::new(default_rules(), Decimal::from(500))
    }
}

impl KeywordRuleEngine {
    pub fn new(rules: Vec<TagRule>, large_amount: Decimal) -> Self {
        let mut prepared: Vec<PreparedRule> = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = match rule.match_type {
                MatchType::Regex => match Regex::new(&rule.pattern) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        tracing::warn!(tag = %rule.tag, pattern = %rule.pattern, error = %err, "rule regex does not compile; rule disabled");
                        None
                    }
                },
                _ => None,
            };
            prepared.push(PreparedRule { rule, regex });
        }
        prepared.sort_by_key(|p| std::cmp::Reverse(p.rule.priority));
        Self {
            rules: prepared,
            large_amount,
        }
    }

    pub fn with_large_amount(mut self, large_amount: Decimal) -> Self {
        self.large_amount = large_amount;
        self
    }

    pub fn rules(&self) -> impl Iterator<Item = &TagRule> {
        self.rules.iter().map(|cr| &cr.rule)
    }

    /// Scores a raw label (and optional free-text description).
    pub fn evaluate(&self, label: &str, description: Option<&str>, amount: Decimal) -> KeywordSignal {
        let text = prepare(label, description);

        let mut by_tag: HashMap<&str, TagHit> = HashMap::new();
        for cr in &self.rules {
            if !rule_matches(cr, &text) {
                continue;
            }
            let rule = &cr.rule;
            let hit = by_tag.entry(rule.tag.as_str()).or_insert_with(|| TagHit {
                tag: rule.tag.clone(),
                score: 0.0,
                keywords: Vec::new(),
                priority: rule.priority,
            });
            hit.score = (hit.score + rule.weight).min(1.0);
            hit.priority = hit.priority.max(rule.priority);
            hit.keywords.push(rule.pattern.clone());
        }

        let mut tags: Vec<TagHit> = by_tag.into_values().collect();
        tags.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.tag.cmp(&b.tag))
        });

        let expense = self.expense_signal(&text, tags.first().map(|t| t.tag.as_str()), amount);
        KeywordSignal { tags, expense }
    }

    fn expense_signal(&self, text: &str, primary_tag: Option<&str>, amount: Decimal) -> ExpenseSignal {
        let mut signal = ExpenseSignal::default();

        for term in FIXED_TERMS.iter().filter(|t| contains_word(text, t)) {
            signal.fixed += TERM_WEIGHT;
            signal.reasons.push(format!("'{term}' suggests FIXED"));
        }
        for term in VARIABLE_TERMS.iter().filter(|t| contains_word(text, t)) {
            signal.variable += TERM_WEIGHT;
            signal.reasons.push(format!("'{term}' suggests VARIABLE"));
        }

        if let Some(tag) = primary_tag {
            if FIXED_TAGS.contains(&tag) {
                signal.fixed += TAG_SEMANTIC_WEIGHT;
                signal.reasons.push(format!("tag '{tag}' is usually FIXED"));
            } else if VARIABLE_TAGS.contains(&tag) {
                signal.variable += TAG_SEMANTIC_WEIGHT;
                signal.reasons.push(format!("tag '{tag}' is usually VARIABLE"));
            }
        }

        let magnitude = amount.abs();
        if magnitude >= self.large_amount && !magnitude.is_zero() {
            signal.fixed += LARGE_AMOUNT_WEIGHT;
            signal.reasons.push(format!("amount {magnitude} is large"));
        }
        if magnitude >= Decimal::TEN && magnitude.fract().is_zero() {
            signal.fixed += ROUND_AMOUNT_WEIGHT;
            signal.reasons.push(format!("amount {magnitude} is round"));
        }
        signal
    }
}

/// Upper-case, accent-folded, punctuation-free text with single spaces.
fn prepare(label: &str, description: Option<&str>) -> String {
    let joined = match description {
        Some(d) => format!("{label} {d}"),
        None => label.to_string(),
    };
    let folded = fold_accents(&joined.to_uppercase());
    let cleaned: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_whitespace(&cleaned)
}

fn contains_word(text: &str, word: &str) -> bool {
    format!(" {text} ").contains(&format!(" {word} "))
}

fn rule_matches(cr: &PreparedRule, text: &str) -> bool {
    let pattern = cr.rule.pattern.to_uppercase();
    match &cr.rule.match_type {
        MatchType::Word => contains_word(text, &pattern),
        MatchType::Contains => text.contains(&pattern),
        MatchType::Exact => text == pattern,
        MatchType::Regex => cr
            .regex
            .as_ref()
            .is_some_and(|re| re.is_match(text)),
        MatchType::Fuzzy { threshold } => text
            .split(' ')
            .any(|word| edit_ratio(word, &pattern) >= *threshold),
    }
}

/// Built-in French retail and banking vocabulary.
pub fn default_rules() -> Vec<TagRule> {
    const TABLE: &[(&str, i32, &[&str], f32)] = &[
        (
            "alimentation",
            10,
            &[
                "CARREFOUR", "LECLERC", "AUCHAN", "LIDL", "ALDI", "MONOPRIX", "MONOP", "FRANPRIX",
                "INTERMARCHE", "CASINO", "PICARD", "BIOCOOP", "NATURALIA", "SUPERMARCHE",
                "BOULANGERIE", "PRIMEUR", "SUPER U", "HYPER U", "GRAND FRAIS",
            ],
            0.8,
        ),
        (
            "restaurant",
            20,
            &[
                "RESTAURANT", "RESTO", "BRASSERIE", "MCDONALD", "MCDONALDS", "BURGER KING", "KFC",
                "SUSHI", "PIZZA", "PIZZERIA", "UBER EATS", "DELIVEROO", "POKAWA", "POKE", "CAFE",
                "BISTROT", "TRAITEUR",
            ],
            0.8,
        ),
        (
            "transport",
            10,
            &[
                "SNCF", "RATP", "NAVIGO", "UBER", "BOLT", "TAXI", "BLABLACAR", "PEAGE", "PARKING",
                "TOTALENERGIES", "ESSO", "SHELL", "CARBURANT", "STATION", "AIR FRANCE", "EASYJET",
            ],
            0.7,
        ),
        (
            "logement",
            15,
            &["LOYER", "EDF", "ENGIE", "GDF", "VEOLIA", "SUEZ", "SYNDIC", "CHARGES", "FONCIA", "NEXITY"],
            0.9,
        ),
        (
            "abonnement",
            15,
            &[
                "NETFLIX", "SPOTIFY", "DEEZER", "DISNEY", "CANAL", "FREE MOBILE", "FREE", "ORANGE",
                "SFR", "BOUYGUES", "SOSH", "ICLOUD", "AMAZON PRIME", "ABONNEMENT", "FORFAIT",
            ],
            0.9,
        ),
        (
            "assurance",
            15,
            &[
                "ASSURANCE", "AXA", "MAIF", "MACIF", "MATMUT", "ALLIANZ", "GROUPAMA", "GENERALI",
                "MUTUELLE", "HARMONIE",
            ],
            0.9,
        ),
        (
            "sante",
            12,
            &["PHARMACIE", "MEDECIN", "DOCTEUR", "DR", "DOCTOLIB", "HOPITAL", "DENTISTE", "LABORATOIRE", "CPAM", "OPTICIEN"],
            0.8,
        ),
        (
            "banque",
            12,
            &["FRAIS", "COMMISSION", "COTISATION", "AGIOS", "INTERETS", "COTIS"],
            0.7,
        ),
        (
            "shopping",
            5,
            &[
                "AMAZON", "FNAC", "DARTY", "BOULANGER", "DECATHLON", "IKEA", "ZARA", "CDISCOUNT",
                "LEROY MERLIN", "CASTORAMA", "SEPHORA", "KIABI",
            ],
            0.7,
        ),
        (
            "loisirs",
            5,
            &["CINEMA", "UGC", "PATHE", "STEAM", "PLAYSTATION", "FNAC SPECTACLES", "THEATRE", "MUSEE"],
            0.7,
        ),
        (
            "revenus",
            18,
            &["SALAIRE", "PAIE", "CAF", "POLE EMPLOI", "FRANCE TRAVAIL", "PENSION", "RETRAITE", "REMBOURSEMENT"],
            0.9,
        ),
    ];

    TABLE
        .iter()
        .flat_map(|(tag, priority, words, weight)| {
            words.iter().map(move |word| TagRule {
                tag: tag.to_string(),
                priority: *priority,
                pattern: word.to_string(),
                match_type: MatchType::Word,
                weight: *weight,
            })
        })
        .collect()
}
