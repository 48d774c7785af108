use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use releve_core::{ClassificationResult, ExpenseType, FeedbackRecord, KnowledgeBase, MerchantPattern};
use thiserror::Error;

use crate::match_engine::FuzzyIndex;
use crate::merchant::normalize_merchant;

pub const MIN_CONFIDENCE: f32 = 0.05;
pub const MAX_CONFIDENCE: f32 = 0.98;
const AGREE_STEP: f32 = 0.02;
const DISAGREE_STEP: f32 = 0.10;

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("Knowledge base I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Knowledge base is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct State {
    patterns: BTreeMap<String, MerchantPattern>,
    /// Every feedback record ever received, by merchant key.
    log: HashMap<String, Vec<FeedbackRecord>>,
    /// Records per key not yet folded into a pattern.
    pending: BTreeMap<String, usize>,
    index: Arc<FuzzyIndex>,
}

impl State {
    fn publish(&mut self) {
        self.index = Arc::new(FuzzyIndex::build(self.patterns.values().cloned()));
    }
}

/// Owner of the merchant patterns. Feedback goes in, index snapshots come out.
#[derive(Debug, Default)]
pub struct LearningStore {
    state: RwLock<State>,
}

/// Starting confidence for `n` agreeing examples before the agreement ratio applies.
pub fn base_confidence(n: usize) -> f32 {
    let mut c = 0.5 + 0.05 * n as f32;
    if n >= 3 {
        c += 0.1;
    }
    if n >= 5 {
        c += 0.1;
    }
    c
}

impl LearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_knowledge_base(kb: KnowledgeBase) -> Self {
        let store = Self::new();
        store.load_knowledge_base(kb);
        store
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current immutable index; later learning does not affect it.
    pub fn snapshot(&self) -> Arc<FuzzyIndex> {
        Arc::clone(&self.read().index)
    }

    pub fn pattern(&self, key: &str) -> Option<MerchantPattern> {
        self.read().patterns.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().patterns.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.read().pending.values().sum()
    }

    /// Appends a correction to the log; returns the merchant key it was filed under.
    pub fn record_feedback(&self, record: FeedbackRecord) -> String {
        let key = normalize_merchant(&record.label);
        let mut state = self.write();
        state.log.entry(key.clone()).or_default().push(record);
        *state.pending.entry(key.clone()).or_default() += 1;
        key
    }

    /// Folds pending feedback into patterns; returns the patterns that changed.
    pub fn apply_learning(&self, min_examples: usize) -> Vec<MerchantPattern> {
        let mut state = self.write();
        let pending: Vec<(String, usize)> =
            state.pending.iter().map(|(k, n)| (k.clone(), *n)).collect();

        let mut updated = Vec::new();
        for (key, fresh) in pending {
            let Some(records) = state.log.get(&key) else {
                continue;
            };
            let existing = state.patterns.get(&key);
            let Some(pattern) = learn_from(&key, records, fresh, existing, min_examples) else {
                continue;
            };
            tracing::debug!(
                key = %key,
                tag = %pattern.learned_tag,
                expense_type = %pattern.learned_expense_type,
                confidence = pattern.confidence_score,
                "pattern learned"
            );
            state.pending.remove(&key);
            state.patterns.insert(key, pattern.clone());
            updated.push(pattern);
        }

        if !updated.is_empty() {
            state.publish();
        }
        updated
    }

    /// Adopts a confident keyword guess as a new pattern when the merchant is unknown.
    pub fn observe_classification(
        &self,
        label: &str,
        result: &ClassificationResult,
        threshold: f32,
    ) -> Option<MerchantPattern> {
        if result.matched_pattern_key.is_some() || result.is_fallback() || result.confidence < threshold {
            return None;
        }
        let key = normalize_merchant(label);
        if key.is_empty() {
            return None;
        }
        let mut state = self.write();
        if state.patterns.contains_key(&key) {
            return None;
        }
        let mut pattern = MerchantPattern::new(
            key.clone(),
            result.suggested_tag.clone(),
            result.expense_type.unwrap_or(ExpenseType::Variable),
            result.confidence,
        );
        pattern.usage_count = 1;
        tracing::debug!(key = %key, tag = %pattern.learned_tag, "pattern adopted from keywords");
        state.patterns.insert(key, pattern.clone());
        state.publish();
        Some(pattern)
    }

    pub fn export_knowledge_base(&self) -> KnowledgeBase {
        self.read()
            .patterns
            .iter()
            .map(|(k, p)| (k.clone(), p.to_record()))
            .collect()
    }

    /// Replaces all patterns. Feedback history is kept.
    pub fn load_knowledge_base(&self, kb: KnowledgeBase) {
        let mut state = self.write();
        state.patterns = kb
            .into_iter()
            .filter(|(k, _)| !k.trim().is_empty())
            .map(|(k, record)| (k.clone(), MerchantPattern::from_record(k, record)))
            .collect();
        state.publish();
    }

    pub fn save_json(&self, path: &Path) -> Result<(), LearningError> {
        let json = serde_json::to_string_pretty(&self.export_knowledge_base())?;
        std::fs::write(path, json).map_err(|source| LearningError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_json(path: &Path) -> Result<Self, LearningError> {
        let content = std::fs::read_to_string(path).map_err(|source| LearningError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let kb: KnowledgeBase = serde_json::from_str(&content)?;
        Ok(Self::from_knowledge_base(kb))
    }
}

/// The new state of one merchant's pattern, or `None` when there is not yet enough evidence.
fn learn_from(
    key: &str,
    records: &[FeedbackRecord],
    fresh: usize,
    existing: Option<&MerchantPattern>,
    min_examples: usize,
) -> Option<MerchantPattern> {
    if records.is_empty() {
        return None;
    }
    let fallback_type = existing.map(|p| p.learned_expense_type);
    let resolved: Vec<(String, ExpenseType)> = records
        .iter()
        .map(|r| {
            let expense = r
                .actual_expense_type
                .or(r.predicted_expense_type)
                .or(fallback_type)
                .unwrap_or(ExpenseType::Variable);
            (r.actual_tag.trim().to_lowercase(), expense)
        })
        .collect();

    // Majority (tag, type); ties go to the most recent.
    let mut counts: HashMap<&(String, ExpenseType), (usize, usize)> = HashMap::new();
    for (i, pair) in resolved.iter().enumerate() {
        let entry = counts.entry(pair).or_insert((0, i));
        entry.0 += 1;
        entry.1 = i;
    }
    let (majority, &(n, _)) = counts.iter().max_by_key(|(_, stats)| **stats)?;
    let (tag, expense) = (majority.0.clone(), majority.1);

    let total = records.len();
    let success_rate = records.iter().filter(|r| r.tag_was_correct()).count() as f32 / total as f32;

    let mut pattern = if n >= min_examples {
        let agreement = n as f32 / total as f32;
        let confidence = (base_confidence(n) * agreement).min(MAX_CONFIDENCE);
        let mut p = existing
            .cloned()
            .unwrap_or_else(|| MerchantPattern::new(key, tag.clone(), expense, confidence));
        p.learned_tag = tag;
        p.learned_expense_type = expense;
        p.confidence_score = confidence.clamp(0.0, 1.0);
        p
    } else {
        let mut p = existing?.clone();
        let current = (p.learned_tag.to_lowercase(), p.learned_expense_type);
        let mut confidence = p.confidence_score;
        for pair in resolved.iter().skip(total.saturating_sub(fresh)) {
            if *pair == current {
                confidence += AGREE_STEP;
            } else {
                confidence -= DISAGREE_STEP;
            }
        }
        p.confidence_score = confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
        p
    };

    pattern.usage_count = pattern.usage_count.saturating_add(fresh as u32);
    pattern.success_rate = success_rate;
    Some(pattern)
}
