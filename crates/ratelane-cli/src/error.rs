//! CLI error types.

use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Live subsystem error.
    #[error(transparent)]
    Live(#[from] ratelane_live::LiveError),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_error_display_config() {
        let err = CliError::Config("bad url".into());
        assert_eq!(err.to_string(), "configuration error: bad url");
    }

    #[test]
    fn cli_error_from_live_is_transparent() {
        let err = CliError::from(ratelane_live::LiveError::Config("bad".into()));
        assert_eq!(err.to_string(), "configuration error: bad");
    }

    #[test]
    fn cli_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert!(matches!(CliError::from(io), CliError::Io(_)));
    }
}
