pub mod cache;
pub mod learning;
pub mod match_engine;
pub mod merchant;
pub mod rules;
pub mod scorer;
pub(crate) mod util;

pub use cache::{CacheKey, CacheKind, CacheStats, Invalidation, SuggestionCache};
pub use learning::{LearningError, LearningStore};
pub use match_engine::{build_index, similarity, FuzzyIndex, FuzzyMatch, DEFAULT_THRESHOLD};
pub use merchant::normalize_merchant;
pub use rules::{KeywordRuleEngine, KeywordSignal, MatchType, TagRule};
pub use scorer::Classifier;
