//! Model error types.

use thiserror::Error;
use uuid::Uuid;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Preset not found: {0}")]
    PresetNotFound(Uuid),

    #[error("Preset group not found: {0}")]
    PresetGroupNotFound(Uuid),

    #[error("Invalid preset file: {0}")]
    InvalidPresetFile(String),

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid_preset_file(msg: impl Into<String>) -> Self {
        Self::InvalidPresetFile(msg.into())
    }
}
