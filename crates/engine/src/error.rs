use releve_classify::LearningError;
use releve_core::SettingsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("Knowledge base error: {0}")]
    Learning(#[from] LearningError),
}
