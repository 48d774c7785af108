use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime configuration, loaded from TOML. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub import: ImportSettings,
    pub matching: MatchingSettings,
    pub classification: ClassificationSettings,
    pub learning: LearningSettings,
    pub cache: CacheSettings,
    pub jobs: JobSettings,
    /// JSON knowledge-base snapshot loaded at start, if present.
    pub knowledge_base: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub max_file_bytes: usize,
    /// Above this share of unparseable rows the whole file is refused.
    pub max_invalid_ratio: f32,
    pub day_first: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_invalid_ratio: 0.5,
            day_first: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    pub threshold: f32,
    pub max_candidates: usize,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            max_candidates: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    pub infer_expense_type: bool,
    /// Absolute amount from which a transaction leans FIXED.
    pub large_amount: i64,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            infer_expense_type: true,
            large_amount: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningSettings {
    pub min_examples: usize,
    /// Run `apply_learning` after every feedback submission.
    pub auto_apply: bool,
    /// Fallback classifications at or above this create a pattern. `None` disables.
    pub auto_learn_confidence: Option<f32>,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            min_examples: 3,
            auto_apply: true,
            auto_learn_confidence: Some(0.6),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub suggestion_ttl_secs: u64,
    pub insight_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            suggestion_ttl_secs: 300,
            insight_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub workers: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(0.0..=1.0).contains(&self.matching.threshold) {
            return Err(SettingsError::Invalid {
                field: "matching.threshold",
                reason: format!("{} is outside 0.0–1.0", self.matching.threshold),
            });
        }
        if !(0.0..=1.0).contains(&self.import.max_invalid_ratio) {
            return Err(SettingsError::Invalid {
                field: "import.max_invalid_ratio",
                reason: format!("{} is outside 0.0–1.0", self.import.max_invalid_ratio),
            });
        }
        if self.import.max_file_bytes == 0 {
            return Err(SettingsError::Invalid {
                field: "import.max_file_bytes",
                reason: "must be positive".to_string(),
            });
        }
        if self.learning.min_examples == 0 {
            return Err(SettingsError::Invalid {
                field: "learning.min_examples",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.jobs.workers == 0 {
            return Err(SettingsError::Invalid {
                field: "jobs.workers",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
