//! Known channels and their typed payloads.
//!
//! Channel names are opaque strings to the router; the constants here are the
//! ones the dashboard features subscribe to.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::frame::InboundEvent;
use crate::plan::Plan;

/// Per-minute usage point for one API.
pub const USAGE_DATAPOINT: &str = "usage_datapoint";
/// Account-wide dashboard counters.
pub const DASHBOARD_STATS: &str = "dashboard.stats";
/// An alert rule fired.
pub const ALERT_TRIGGERED: &str = "alert.triggered";
/// A proxied API's circuit breaker changed state.
pub const CIRCUIT_BREAKER_STATE_CHANGE: &str = "circuit_breaker.state_change";
/// One proxied request, for the live request stream.
pub const REQUEST_LOG: &str = "request.log";
/// Upstream health of a proxied API.
pub const API_STATUS: &str = "api.status";

/// All channels with a typed payload.
pub const KNOWN_CHANNELS: [&str; 6] = [
    USAGE_DATAPOINT,
    DASHBOARD_STATS,
    ALERT_TRIGGERED,
    CIRCUIT_BREAKER_STATE_CHANGE,
    REQUEST_LOG,
    API_STATUS,
];

/// A typed payload carried on exactly one channel.
pub trait LivePayload: DeserializeOwned + Send + 'static {
    /// Channel this payload is published on.
    const CHANNEL: &'static str;

    /// Lowest plan allowed to receive this channel live.
    const REQUIRED_PLAN: Plan;

    /// The API this payload concerns, if it is scoped to one.
    fn api_id(&self) -> Option<&str> {
        None
    }

    /// Decode from an untyped payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the expected shape.
    fn decode(data: &serde_json::Value) -> Result<Self, ProtoError> {
        Self::deserialize(data)
            .map_err(|e| ProtoError::Decoding(format!("{}: {e}", Self::CHANNEL)))
    }
}

/// Usage counters for one API over one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDatapoint {
    /// Proxied API identifier.
    pub api_id: String,
    /// Start of the interval.
    pub timestamp: DateTime<Utc>,
    /// Requests forwarded.
    pub requests: u64,
    /// Requests rejected by the rate limiter.
    #[serde(default)]
    pub rate_limited: u64,
    /// Upstream errors.
    #[serde(default)]
    pub errors: u64,
    /// Mean upstream latency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
}

impl LivePayload for UsageDatapoint {
    const CHANNEL: &'static str = USAGE_DATAPOINT;
    const REQUIRED_PLAN: Plan = Plan::Pro;

    fn api_id(&self) -> Option<&str> {
        Some(&self.api_id)
    }
}

/// Account-wide counters shown on the stat cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    /// Requests in the current billing period.
    pub total_requests: u64,
    /// Rate-limited requests in the current billing period.
    pub rate_limited_requests: u64,
    /// Number of configured APIs.
    pub active_apis: u32,
    /// Fraction of requests that failed upstream.
    #[serde(default)]
    pub error_rate: f64,
    /// Mean latency across APIs.
    #[serde(default)]
    pub avg_latency_ms: f64,
}

impl LivePayload for DashboardStats {
    const CHANNEL: &'static str = DASHBOARD_STATS;
    const REQUIRED_PLAN: Plan = Plan::Pro;
}

/// Severity of a fired alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational.
    Info,
    /// Needs attention.
    Warning,
    /// Needs immediate attention.
    Critical,
}

/// An alert rule fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertTriggered {
    /// Alert rule identifier.
    pub alert_id: String,
    /// API the alert concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id: Option<String>,
    /// Severity.
    pub severity: AlertSeverity,
    /// Human-readable message.
    pub message: String,
    /// When the rule fired.
    pub triggered_at: DateTime<Utc>,
}

impl LivePayload for AlertTriggered {
    const CHANNEL: &'static str = ALERT_TRIGGERED;
    const REQUIRED_PLAN: Plan = Plan::Pro;

    fn api_id(&self) -> Option<&str> {
        self.api_id.as_deref()
    }
}

/// Circuit breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Traffic flows.
    Closed,
    /// Traffic is short-circuited.
    Open,
    /// Probing upstream with limited traffic.
    HalfOpen,
}

/// A circuit breaker transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStateChange {
    /// Proxied API identifier.
    pub api_id: String,
    /// State before the transition.
    pub previous: BreakerState,
    /// State after the transition.
    pub current: BreakerState,
    /// Why the breaker moved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the transition happened.
    pub changed_at: DateTime<Utc>,
}

impl LivePayload for CircuitBreakerStateChange {
    const CHANNEL: &'static str = CIRCUIT_BREAKER_STATE_CHANGE;
    const REQUIRED_PLAN: Plan = Plan::Pro;

    fn api_id(&self) -> Option<&str> {
        Some(&self.api_id)
    }
}

/// One proxied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    /// Request identifier.
    pub request_id: String,
    /// Proxied API identifier.
    pub api_id: String,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Response status code.
    pub status: u16,
    /// End-to-end latency.
    pub latency_ms: u64,
    /// Whether the rate limiter rejected the request.
    #[serde(default)]
    pub rate_limited: bool,
    /// When the request completed.
    pub timestamp: DateTime<Utc>,
}

impl LivePayload for RequestLogEntry {
    const CHANNEL: &'static str = REQUEST_LOG;
    const REQUIRED_PLAN: Plan = Plan::Enterprise;

    fn api_id(&self) -> Option<&str> {
        Some(&self.api_id)
    }
}

/// Upstream health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiHealth {
    /// Responding normally.
    Healthy,
    /// Slow or partially failing.
    Degraded,
    /// Not responding.
    Down,
}

/// Health update for one API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStatusUpdate {
    /// Proxied API identifier.
    pub api_id: String,
    /// Current health.
    pub status: ApiHealth,
    /// Optional detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl LivePayload for ApiStatusUpdate {
    const CHANNEL: &'static str = API_STATUS;
    const REQUIRED_PLAN: Plan = Plan::Pro;

    fn api_id(&self) -> Option<&str> {
        Some(&self.api_id)
    }
}

/// Tagged union of every known channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// `usage_datapoint`
    Usage(UsageDatapoint),
    /// `dashboard.stats`
    Stats(DashboardStats),
    /// `alert.triggered`
    Alert(AlertTriggered),
    /// `circuit_breaker.state_change`
    CircuitBreaker(CircuitBreakerStateChange),
    /// `request.log`
    Request(RequestLogEntry),
    /// `api.status`
    ApiStatus(ApiStatusUpdate),
}

impl ChannelEvent {
    /// Decode an inbound event according to its channel.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnknownChannel`] for channels without a typed
    /// payload, or a decoding error if the payload shape is wrong.
    pub fn decode(event: &InboundEvent) -> Result<Self, ProtoError> {
        let data = &event.data;
        match event.channel.as_str() {
            USAGE_DATAPOINT => UsageDatapoint::decode(data).map(Self::Usage),
            DASHBOARD_STATS => DashboardStats::decode(data).map(Self::Stats),
            ALERT_TRIGGERED => AlertTriggered::decode(data).map(Self::Alert),
            CIRCUIT_BREAKER_STATE_CHANGE => {
                CircuitBreakerStateChange::decode(data).map(Self::CircuitBreaker)
            }
            REQUEST_LOG => RequestLogEntry::decode(data).map(Self::Request),
            API_STATUS => ApiStatusUpdate::decode(data).map(Self::ApiStatus),
            other => Err(ProtoError::UnknownChannel(other.to_string())),
        }
    }

    /// Channel name of this event.
    #[must_use]
    pub const fn channel(&self) -> &'static str {
        match self {
            Self::Usage(_) => USAGE_DATAPOINT,
            Self::Stats(_) => DASHBOARD_STATS,
            Self::Alert(_) => ALERT_TRIGGERED,
            Self::CircuitBreaker(_) => CIRCUIT_BREAKER_STATE_CHANGE,
            Self::Request(_) => REQUEST_LOG,
            Self::ApiStatus(_) => API_STATUS,
        }
    }

    /// The API this event concerns, if any.
    #[must_use]
    pub fn api_id(&self) -> Option<&str> {
        match self {
            Self::Usage(p) => p.api_id(),
            Self::Stats(p) => p.api_id(),
            Self::Alert(p) => p.api_id(),
            Self::CircuitBreaker(p) => p.api_id(),
            Self::Request(p) => p.api_id(),
            Self::ApiStatus(p) => p.api_id(),
        }
    }
}
