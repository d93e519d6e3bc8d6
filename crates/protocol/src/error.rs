//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// An inbound frame could not be decoded as a known message.
    ///
    /// Covers unparseable JSON, an unknown `type` tag, and missing required
    /// fields for the given `type`.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Convenience result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
