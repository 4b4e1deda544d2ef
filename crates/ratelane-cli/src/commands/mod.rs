//! CLI command implementations.
//!
//! - [`watch`] - Stream a feature, live or polled
//! - [`access`] - Plan access checks
//! - [`channels`] - Channel requirement table

use std::path::Path;

use ratelane_live::LiveConfig;

use crate::error::CliError;

pub mod access;
pub mod channels;
pub mod watch;

pub use access::AccessCommand;
pub use channels::ChannelsCommand;
pub use watch::WatchCommand;

/// Live endpoint used when neither a config file nor `--url` names one.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";

/// Resolve the live configuration from an optional file and URL override.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the result is invalid.
pub fn load_config(path: Option<&Path>, url: Option<&str>) -> Result<LiveConfig, CliError> {
    let config = match path {
        Some(path) => LiveConfig::from_file(path)?,
        None => LiveConfig::new(DEFAULT_WS_URL),
    };
    let config = match url {
        Some(url) => config.with_url(url),
        None => config,
    };
    config.validate()?;
    Ok(config)
}
