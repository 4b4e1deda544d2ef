//! Error types for the ratelane-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding channel messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a message.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a message.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The channel name is not one this crate knows a payload for.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}
