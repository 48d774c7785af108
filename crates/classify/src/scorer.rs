use releve_core::{ClassificationResult, ClassificationSettings, ExpenseType, MatchingSettings};
use rust_decimal::Decimal;

use crate::match_engine::FuzzyIndex;
use crate::merchant::normalize_merchant;
use crate::rules::{KeywordRuleEngine, KeywordSignal};

/// Confidence of a keyword guess backed by no evidence at all.
pub const FALLBACK_FLOOR: f32 = 0.1;
/// How much of the remaining range keyword evidence can earn.
pub const FALLBACK_SPAN: f32 = 0.6;

/// Turns a label into a tag, an expense type and a confidence. Never fails.
pub struct Classifier {
    rules: KeywordRuleEngine,
    threshold: f32,
    max_candidates: usize,
    infer_expense_type: bool,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&MatchingSettings::default(), &ClassificationSettings::default())
    }
}

impl Classifier {
    pub fn new(matching: &MatchingSettings, classification: &ClassificationSettings) -> Self {
        Self {
            rules: KeywordRuleEngine::default()
                .with_large_amount(Decimal::from(classification.large_amount)),
            threshold: matching.threshold,
            max_candidates: matching.max_candidates.max(1),
            infer_expense_type: classification.infer_expense_type,
        }
    }

    pub fn with_rules(mut self, rules: KeywordRuleEngine) -> Self {
        self.rules = rules;
        self
    }

    pub fn classify(
        &self,
        index: &FuzzyIndex,
        label: &str,
        amount: Decimal,
        description: Option<&str>,
    ) -> ClassificationResult {
        let key = normalize_merchant(label);
        let mut candidates = index.lookup(&key, self.threshold);
        candidates.truncate(self.max_candidates);
        let signal = self.rules.evaluate(label, description, amount);

        // Highest confidence × similarity; the earlier candidate wins ties.
        let best = candidates
            .iter()
            .filter_map(|c| index.get(&c.key).map(|p| (c, p)))
            .map(|(c, p)| (c, p, (p.confidence_score * c.similarity).clamp(0.0, 1.0)))
            .reduce(|best, next| if next.2 > best.2 { next } else { best });

        let mut result = match best {
            Some((candidate, pattern, confidence)) => ClassificationResult {
                suggested_tag: pattern.learned_tag.clone(),
                confidence,
                expense_type: Some(pattern.learned_expense_type),
                expense_type_confidence: Some(confidence),
                alternative_tags: Vec::new(),
                matched_pattern_key: Some(pattern.normalized_key.clone()),
                explanation: format!(
                    "Matched learned merchant '{}' (similarity {:.2}, pattern confidence {:.2})",
                    pattern.normalized_key, candidate.similarity, pattern.confidence_score
                ),
            },
            None => keyword_fallback(&key, &signal),
        };

        // Next-best learned merchants first, then other keyword tags.
        let mut alternatives: Vec<String> = Vec::new();
        let primary_key = result.matched_pattern_key.clone();
        let learned = candidates
            .iter()
            .filter(|c| primary_key.as_deref() != Some(c.key.as_str()))
            .filter_map(|c| index.get(&c.key))
            .map(|p| p.learned_tag.clone());
        let keyword = signal.tags.iter().map(|t| t.tag.clone());
        for tag in learned.chain(keyword) {
            if tag != result.suggested_tag && !alternatives.contains(&tag) {
                alternatives.push(tag);
            }
        }
        result.alternative_tags = alternatives;

        if !self.infer_expense_type {
            result.expense_type = None;
            result.expense_type_confidence = None;
        }

        tracing::trace!(
            key = %key,
            tag = %result.suggested_tag,
            confidence = result.confidence,
            "classified"
        );
        result
    }
}

fn keyword_fallback(key: &str, signal: &KeywordSignal) -> ClassificationResult {
    let strength = signal.strength();
    let confidence = (FALLBACK_FLOOR + FALLBACK_SPAN * strength).clamp(0.0, 1.0);
    let expense_type = signal.expense.expense_type();
    let expense_type_confidence = (0.5 + 0.4 * signal.expense.margin()).clamp(0.0, 1.0);

    match signal.primary() {
        Some(hit) => ClassificationResult {
            suggested_tag: hit.tag.clone(),
            confidence,
            expense_type: Some(expense_type),
            expense_type_confidence: Some(expense_type_confidence),
            alternative_tags: Vec::new(),
            matched_pattern_key: None,
            explanation: format!(
                "No learned merchant for '{key}'; keywords {} suggest '{}'{}",
                hit.keywords.join(", "),
                hit.tag,
                expense_reasons(signal)
            ),
        },
        None => {
            let mut result = ClassificationResult::fallback(
                confidence,
                format!("No learned merchant or keyword for '{key}'{}", expense_reasons(signal)),
            );
            result.expense_type = Some(if signal.expense.margin() > 0.0 {
                expense_type
            } else {
                ExpenseType::Variable
            });
            result.expense_type_confidence = Some(expense_type_confidence);
            result
        }
    }
}

fn expense_reasons(signal: &KeywordSignal) -> String {
    if signal.expense.reasons.is_empty() {
        String::new()
    } else {
        format!("; {}", signal.expense.reasons.join(", "))
    }
}
