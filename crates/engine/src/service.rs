use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use releve_classify::{CacheKey, CacheKind, CacheStats, Classifier, Invalidation, LearningStore, SuggestionCache};
use releve_core::{
    collapse_whitespace, ClassificationResult, FeedbackRecord, KnowledgeBase, MerchantPattern, Month,
    CanonicalTransaction, Settings,
};
use releve_import::{duplicate_key, IngestError, IngestOutcome, LedgerLookup};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::jobs::JobPool;

/// One line of a batch classification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub label: String,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

/// A freshly imported transaction with its suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedTransaction {
    /// Content key, as used for duplicate detection.
    pub key: String,
    pub transaction: CanonicalTransaction,
    pub classification: ClassificationResult,
}

struct Shared {
    settings: Settings,
    classifier: Classifier,
    store: LearningStore,
    cache: SuggestionCache<ClassificationResult>,
}

/// The service handle. Clones share the same store and cache.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_store(Settings::default(), LearningStore::new())
    }
}

impl Engine {
    /// Validates `settings` and loads the configured knowledge base when the file exists.
    pub fn new(settings: Settings) -> Result<Self, EngineError> {
        settings.validate()?;
        let store = match &settings.knowledge_base {
            Some(path) if path.exists() => {
                let store = LearningStore::load_json(path)?;
                tracing::info!(path = %path.display(), patterns = store.len(), "knowledge base loaded");
                store
            }
            _ => LearningStore::new(),
        };
        Ok(Self::with_store(settings, store))
    }

    pub fn with_store(settings: Settings, store: LearningStore) -> Self {
        let classifier = Classifier::new(&settings.matching, &settings.classification);
        let cache = SuggestionCache::new(&settings.cache);
        Engine {
            shared: Arc::new(Shared {
                settings,
                classifier,
                store,
                cache,
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub fn store(&self) -> &LearningStore {
        &self.shared.store
    }

    /// Parses an uploaded export. Insights cached for the months it touches are dropped.
    pub fn ingest(
        &self,
        filename: &str,
        content: &[u8],
        ledger: &dyn LedgerLookup,
    ) -> Result<IngestOutcome, IngestError> {
        let outcome = match releve_import::ingest(filename, content, &self.shared.settings.import, ledger) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(filename, error = %err, "import refused");
                return Err(err);
            }
        };
        for summary in &outcome.batch.detected_months {
            let month = summary.month.to_string();
            self.shared.cache.invalidate(Invalidation::Scope(&month));
        }
        Ok(outcome)
    }

    pub fn classify(&self, label: &str, amount: Decimal, description: Option<&str>) -> ClassificationResult {
        let key = CacheKey::suggestion(suggestion_id(label, amount, description));
        if let Some(hit) = self.shared.cache.get(&key) {
            return hit;
        }
        // Taken before the snapshot: learning that lands in between bumps it.
        let generation = self.shared.cache.generation();
        let index = self.shared.store.snapshot();
        let result = self.shared.classifier.classify(&index, label, amount, description);
        // An adopted pattern changes the answer for this label, so it is not cached.
        if !self.observe(label, &result) {
            self.shared
                .cache
                .set_if_current(key, result.clone(), None, generation);
        }
        result
    }

    pub fn classify_batch(&self, items: &[BatchItem]) -> HashMap<String, ClassificationResult> {
        items
            .iter()
            .map(|item| {
                let result = self.classify(&item.label, item.amount, item.description.as_deref());
                (item.id.clone(), result)
            })
            .collect()
    }

    /// Classifies the non-duplicate rows of an import and files each result under its month.
    pub fn classify_imported(&self, outcome: &IngestOutcome) -> Vec<ClassifiedTransaction> {
        outcome
            .new_transactions()
            .map(|tx| {
                let key = duplicate_key(tx);
                let generation = self.shared.cache.generation();
                let classification = self.classify(&tx.label, tx.amount, tx.category.as_deref());
                self.shared.cache.set_if_current(
                    CacheKey::insight(tx.month().to_string(), key.clone()),
                    classification.clone(),
                    None,
                    generation,
                );
                ClassifiedTransaction {
                    key,
                    transaction: tx.clone(),
                    classification,
                }
            })
            .collect()
    }

    /// The suggestion recorded for an imported transaction, while still fresh.
    pub fn imported_insight(&self, month: Month, key: &str) -> Option<ClassificationResult> {
        self.shared.cache.get(&CacheKey::insight(month.to_string(), key))
    }

    /// Logs a correction; with `learning.auto_apply` it is folded in right away.
    pub fn submit_feedback(&self, record: FeedbackRecord) -> Vec<MerchantPattern> {
        let key = self.shared.store.record_feedback(record);
        tracing::debug!(key = %key, "feedback recorded");
        if self.shared.settings.learning.auto_apply {
            self.apply_learning()
        } else {
            Vec::new()
        }
    }

    pub fn apply_learning(&self) -> Vec<MerchantPattern> {
        let updated = self
            .shared
            .store
            .apply_learning(self.shared.settings.learning.min_examples);
        if !updated.is_empty() {
            self.drop_stale_results();
        }
        updated
    }

    pub fn export_knowledge_base(&self) -> KnowledgeBase {
        self.shared.store.export_knowledge_base()
    }

    pub fn save_knowledge_base(&self, path: &Path) -> Result<(), EngineError> {
        self.shared.store.save_json(path)?;
        tracing::info!(path = %path.display(), patterns = self.shared.store.len(), "knowledge base saved");
        Ok(())
    }

    pub fn invalidate(&self, what: Invalidation<'_>) -> usize {
        self.shared.cache.invalidate(what)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    /// Starts a reclassification pool sized by `jobs.workers`. Needs a running tokio runtime.
    pub fn start_jobs(&self) -> JobPool {
        JobPool::start(self.clone(), self.shared.settings.jobs.workers)
    }

    fn observe(&self, label: &str, result: &ClassificationResult) -> bool {
        let Some(threshold) = self.shared.settings.learning.auto_learn_confidence else {
            return false;
        };
        match self.shared.store.observe_classification(label, result, threshold) {
            Some(_) => {
                self.drop_stale_results();
                true
            }
            None => false,
        }
    }

    /// Any pattern change may alter any cached answer.
    fn drop_stale_results(&self) {
        let removed = self.shared.cache.invalidate(Invalidation::Kind(CacheKind::Suggestion))
            + self.shared.cache.invalidate(Invalidation::Kind(CacheKind::ImportInsight));
        tracing::debug!(removed, "cached results dropped after learning");
    }
}

fn suggestion_id(label: &str, amount: Decimal, description: Option<&str>) -> String {
    format!(
        "{}|{}|{}",
        collapse_whitespace(&label.to_uppercase()),
        amount.normalize(),
        description
            .map(|d| collapse_whitespace(&d.to_uppercase()))
            .unwrap_or_default()
    )
}
