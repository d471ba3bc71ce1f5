//! Error types for the voice call pipeline

use thiserror::Error;

/// Result type alias for voice pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice call pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone permission refused by the user or OS
    #[error("microphone permission denied")]
    PermissionDenied,

    /// Handshake failure or timeout while opening the session
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport dropped mid-call
    #[error("session disconnected unexpectedly")]
    Disconnected,

    /// Native audio capture/playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// Call session state violation (e.g. starting a second call)
    #[error("session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error (token handshake)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
