//! Error types for the sync layer.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Opening the transport failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The transport failed after it was open.
    #[error("transport error: {0}")]
    Transport(String),

    /// An outbound message was sent while no connection is open.
    #[error("not connected")]
    NotConnected,

    /// An inbound frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(String),

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

/// Why an inbound frame was dropped. Never fatal to the connection.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or does not have the envelope shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `type` field names no known update kind.
    #[error("unknown update type: {0}")]
    UnknownKind(String),

    /// The payload does not fit the update kind.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}
