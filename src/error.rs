use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubqueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Extraction, probing, muxing or burn-in failure (timeouts included)
    #[error("External tool error: {0}")]
    ExternalTool(String),

    /// Speech-to-text failure, including a model that is not ready
    #[error("Model error: {0}")]
    Model(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Subtitle parse error: {0}")]
    SubtitleParse(String),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Flat tag of a [`SubqueueError`] variant, recorded on stage outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ExternalTool,
    Model,
    Translation,
    Io,
    UnsupportedInput,
    NotFound,
    Conflict,
    InvalidTransition,
    Config,
    Internal,
}

impl SubqueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::SubtitleParse(_) => ErrorKind::Io,
            Self::Json(_) | Self::Toml(_) | Self::Config(_) => ErrorKind::Config,
            Self::Http(_) | Self::Translation(_) => ErrorKind::Translation,
            Self::ExternalTool(_) => ErrorKind::ExternalTool,
            Self::Model(_) => ErrorKind::Model,
            Self::UnsupportedInput(_) => ErrorKind::UnsupportedInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, SubqueueError>;
