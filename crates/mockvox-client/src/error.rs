use std::time::Duration;

use thiserror::Error;

use mockvox_core::protocol::DecodeError;

use crate::device::DeviceError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The server reported a failed turn.
    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("No response within {0:?}")]
    ProcessingTimeout(Duration),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
