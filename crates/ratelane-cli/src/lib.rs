//! # ratelane-cli
//!
//! Command-line client for the Ratelane dashboard's live feeds.
//!
//! Provides commands for:
//! - Watching a feature live, with REST polling when live mode is unavailable
//! - Checking which plan a channel requires
//! - Listing the channel requirement table
//!
//! ```text
//! ┌──────────────┐   push channel (WebSocket)   ┌─────────────────┐
//! │ ratelane-cli │◄─────────────────────────────│ dashboard API   │
//! │              │───── REST polling ──────────►│                 │
//! └──────────────┘                              └─────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{AccessArgs, Cli, Commands, FeatureArg, Format, WatchArgs};
pub use error::CliError;
pub use output::OutputFormat;
