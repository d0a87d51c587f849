//! Error types for the subscription engine.
//!
//! Most of these never escape the engine: transport errors feed the backoff
//! path and store errors degrade to cache misses. They are still typed so
//! that logs and tests can tell them apart.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure (connect, read, write).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Persisted store read/write failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Wire protocol or event model error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] pubsub_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Channel send error.
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Relay URL rejected during normalization.
    #[error("Invalid relay URL '{url}': {reason}")]
    InvalidRelayUrl { url: String, reason: String },
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}
