use std::time::Duration;

use thiserror::Error;

use crate::protocol::DecodeError;

#[derive(Debug, Error)]
pub enum MockvoxError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Content error: {0}")]
    Content(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Processing timed out after {0:?}")]
    ProcessingTimeout(Duration),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MockvoxError>;
