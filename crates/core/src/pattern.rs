use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag used when nothing better is known.
pub const FALLBACK_TAG: &str = "divers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpenseType {
    Fixed,
    Variable,
}

impl fmt::Display for ExpenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpenseType::Fixed => write!(f, "FIXED"),
            ExpenseType::Variable => write!(f, "VARIABLE"),
        }
    }
}

impl std::str::FromStr for ExpenseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIXED" | "FIXE" => Ok(ExpenseType::Fixed),
            "VARIABLE" => Ok(ExpenseType::Variable),
            other => Err(format!("Unknown expense type: '{other}'")),
        }
    }
}

/// A learned association between a merchant key and a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantPattern {
    pub normalized_key: String,
    pub learned_tag: String,
    pub learned_expense_type: ExpenseType,
    /// 0.0–1.0
    pub confidence_score: f32,
    pub usage_count: u32,
    /// Share of feedback where the prediction was already right, 0.0–1.0.
    pub success_rate: f32,
}

impl MerchantPattern {
    pub fn new(
        normalized_key: impl Into<String>,
        learned_tag: impl Into<String>,
        learned_expense_type: ExpenseType,
        confidence_score: f32,
    ) -> Self {
        MerchantPattern {
            normalized_key: normalized_key.into(),
            learned_tag: learned_tag.into(),
            learned_expense_type,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            usage_count: 0,
            success_rate: 0.0,
        }
    }

    pub fn to_record(&self) -> PatternRecord {
        PatternRecord {
            learned_tag: self.learned_tag.clone(),
            learned_expense_type: self.learned_expense_type,
            confidence_score: self.confidence_score,
            usage_count: self.usage_count,
            success_rate: self.success_rate,
        }
    }

    pub fn from_record(normalized_key: impl Into<String>, record: PatternRecord) -> Self {
        MerchantPattern {
            normalized_key: normalized_key.into(),
            learned_tag: record.learned_tag,
            learned_expense_type: record.learned_expense_type,
            confidence_score: record.confidence_score.clamp(0.0, 1.0),
            usage_count: record.usage_count,
            success_rate: record.success_rate.clamp(0.0, 1.0),
        }
    }
}

/// A pattern as persisted in the knowledge base, keyed externally by merchant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub learned_tag: String,
    pub learned_expense_type: ExpenseType,
    pub confidence_score: f32,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub success_rate: f32,
}

/// `{ normalized_key: PatternRecord }`, sorted for stable output.
pub type KnowledgeBase = BTreeMap<String, PatternRecord>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub suggested_tag: String,
    /// 0.0–1.0
    pub confidence: f32,
    pub expense_type: Option<ExpenseType>,
    pub expense_type_confidence: Option<f32>,
    pub alternative_tags: Vec<String>,
    pub matched_pattern_key: Option<String>,
    pub explanation: String,
}

impl ClassificationResult {
    /// The generic low-confidence answer used when no signal exists.
    pub fn fallback(confidence: f32, explanation: impl Into<String>) -> Self {
        ClassificationResult {
            suggested_tag: FALLBACK_TAG.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            expense_type: Some(ExpenseType::Variable),
            expense_type_confidence: None,
            alternative_tags: Vec::new(),
            matched_pattern_key: None,
            explanation: explanation.into(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.suggested_tag == FALLBACK_TAG && self.matched_pattern_key.is_none()
    }
}

/// A user correction of a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub transaction_ref: String,
    /// Label of the corrected transaction; the log is keyed by its merchant key.
    pub label: String,
    pub predicted_tag: String,
    pub actual_tag: String,
    pub predicted_expense_type: Option<ExpenseType>,
    pub actual_expense_type: Option<ExpenseType>,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn tag_was_correct(&self) -> bool {
        self.predicted_tag.eq_ignore_ascii_case(&self.actual_tag)
    }
}
