//! Error types for the relay wire protocol and event model.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding frames or validating events.
#[derive(Error, Debug)]
pub enum Error {
    /// A relay frame could not be decoded into any known shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Event has an invalid field format (e.g., wrong hex length).
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// A filter with no constraints set cannot be subscribed.
    #[error("filter has no constraints set")]
    EmptyFilter,

    /// Configuration is unusable (missing ids, no relays, bad URL).
    #[error("invalid configuration '{id}': {reason}")]
    InvalidConfiguration {
        /// Configuration id.
        id: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
