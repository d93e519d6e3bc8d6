//! Error types for the client crate.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The daemon URL could not be parsed.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// The WebSocket transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}
