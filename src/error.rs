//! Error types for Salin

use thiserror::Error;

/// Result type alias for Salin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Salin
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone could not be acquired (absent or permission denied)
    #[error("microphone unavailable: {0}")]
    Microphone(String),

    /// Live session could not be opened
    #[error("session open failed: {0}")]
    SessionOpen(String),

    /// Inbound audio chunk could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
