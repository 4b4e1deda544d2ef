//! Error types for ratelane-live.

use thiserror::Error;

/// Result type alias for live-channel operations.
pub type LiveResult<T> = Result<T, LiveError>;

/// Errors that can occur below the façade surface.
///
/// None of these cross `subscribe`, `reconnect` or the status getters; the
/// connection manager turns them into [`ConnectionState`](crate::ConnectionState)
/// transitions and log lines.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The transport could not be opened or broke.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server rejected the handshake (e.g. expired session).
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ratelane_proto::ProtoError),

    /// REST fallback request failed.
    #[error("http error: {0}")]
    Http(String),

    /// No async runtime is available to drive the connection.
    #[error("no tokio runtime available")]
    RuntimeUnavailable,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for LiveError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
