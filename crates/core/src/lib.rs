pub mod batch;
pub mod pattern;
pub mod period;
pub mod settings;
pub mod text;
pub mod transaction;

pub use batch::{ImportBatch, MonthSummary};
pub use pattern::{
    ClassificationResult, ExpenseType, FeedbackRecord, KnowledgeBase, MerchantPattern,
    PatternRecord, FALLBACK_TAG,
};
pub use period::Month;
pub use settings::{
    CacheSettings, ClassificationSettings, ImportSettings, JobSettings, LearningSettings,
    MatchingSettings, Settings, SettingsError,
};
pub use text::{collapse_whitespace, fold_accents};
pub use transaction::{CanonicalTransaction, RawRow};
