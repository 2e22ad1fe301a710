//! Error types for PeerDrop wire formats.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// A text frame was expected but a binary frame arrived (or vice versa)
    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),
}
