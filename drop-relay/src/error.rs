//! Error types for peerdrop-relay.

/// Main error type for peerdrop-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Signaling protocol errors.
///
/// The `Display` text is the `error` string sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The message is not a JSON envelope.
    #[error("invalid JSON")]
    InvalidJson,

    /// `connect` without an id.
    #[error("missing id")]
    MissingId,

    /// `connect` with an id nobody is waiting under.
    #[error("invalid ID")]
    InvalidId,

    /// Negotiation payload from an unpaired client.
    #[error("not connected to a peer")]
    NotPaired,

    /// Envelope type the relay does not handle.
    #[error("unknown message type")]
    UnknownType(String),

    /// The client exceeded its message rate.
    #[error("rate limited")]
    RateLimited,

    /// The message exceeds `limits.max_message_size`.
    #[error("message too large")]
    MessageTooLarge {
        /// Size of the message.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
