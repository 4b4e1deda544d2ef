//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ratelane_proto::Plan;
use ratelane_proto::channels::{
    ALERT_TRIGGERED, API_STATUS, CIRCUIT_BREAKER_STATE_CHANGE, DASHBOARD_STATS, REQUEST_LOG,
    USAGE_DATAPOINT,
};

/// Ratelane CLI - live rate-limiting dashboard feeds.
#[derive(Parser, Debug, Clone)]
#[command(name = "ratelane")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Live push endpoint (overrides the config file).
    #[arg(short, long, env = "RATELANE_WS_URL")]
    pub url: Option<String>,

    /// REST API base URL used by the polling fallback.
    #[arg(long, env = "RATELANE_API_URL", default_value = "http://localhost:8080/api/v1")]
    pub api: String,

    /// TOML configuration file.
    #[arg(short, long, env = "RATELANE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Emit logs as JSON.
    #[arg(long)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Stream a feature live, polling the REST API when live mode is unavailable.
    Watch(WatchArgs),

    /// Check whether a plan may receive a channel live.
    Access(AccessArgs),

    /// List channels and the plan each requires.
    Channels,
}

/// Arguments for `watch`.
#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Feature to watch.
    #[arg(value_enum)]
    pub feature: FeatureArg,

    /// Current plan; without it the user is treated as unknown.
    #[arg(short, long, env = "RATELANE_PLAN")]
    pub plan: Option<Plan>,

    /// Only show events for this API.
    #[arg(long)]
    pub api_id: Option<String>,

    /// Stop after this many events.
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Stop after this many seconds.
    #[arg(long)]
    pub duration: Option<u64>,
}

/// Arguments for `access`.
#[derive(Args, Debug, Clone)]
pub struct AccessArgs {
    /// Channel name, e.g. `usage_datapoint`.
    pub channel: String,

    /// Plan to check.
    #[arg(short, long, env = "RATELANE_PLAN")]
    pub plan: Plan,
}

/// Dashboard features that can be watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeatureArg {
    /// Per-minute usage.
    Usage,
    /// Headline statistics.
    Stats,
    /// Fired alerts.
    Alerts,
    /// Circuit breaker transitions.
    CircuitBreakers,
    /// Live request log.
    Requests,
    /// API health.
    ApiStatus,
}

impl FeatureArg {
    /// Live channel carrying this feature.
    #[must_use]
    pub const fn channel(self) -> &'static str {
        match self {
            Self::Usage => USAGE_DATAPOINT,
            Self::Stats => DASHBOARD_STATS,
            Self::Alerts => ALERT_TRIGGERED,
            Self::CircuitBreakers => CIRCUIT_BREAKER_STATE_CHANGE,
            Self::Requests => REQUEST_LOG,
            Self::ApiStatus => API_STATUS,
        }
    }

    /// REST path polled when live mode is unavailable.
    #[must_use]
    pub const fn rest_path(self) -> &'static str {
        match self {
            Self::Usage => "analytics/usage",
            Self::Stats => "dashboard/stats",
            Self::Alerts => "alerts",
            Self::CircuitBreakers => "circuit-breakers",
            Self::Requests => "requests",
            Self::ApiStatus => "apis/status",
        }
    }
}
