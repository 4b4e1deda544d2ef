//! Plan-based access gate for live channels.
//!
//! Access is a pure function of the caller's plan and the channel's required
//! plan. Nothing here is cached; callers ask again whenever they need the
//! answer so a plan change takes effect on the next check.

use std::collections::HashMap;

use ratelane_proto::channels::KNOWN_CHANNELS;
use ratelane_proto::{
    AlertTriggered, ApiStatusUpdate, CircuitBreakerStateChange, DashboardStats, LivePayload, Plan,
    RequestLogEntry, UsageDatapoint,
};

use crate::error::{LiveError, LiveResult};

/// Whether `plan` may use a channel that requires `required`.
///
/// An unknown plan (no user loaded yet) never has access.
#[must_use]
pub fn has_access(plan: Option<Plan>, required: Plan) -> bool {
    plan.is_some_and(|plan| plan.satisfies(required))
}

/// Required plan per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGate {
    default_requirement: Plan,
    requirements: HashMap<String, Plan>,
}

impl Default for AccessGate {
    fn default() -> Self {
        let requirements = [
            (UsageDatapoint::CHANNEL, UsageDatapoint::REQUIRED_PLAN),
            (DashboardStats::CHANNEL, DashboardStats::REQUIRED_PLAN),
            (AlertTriggered::CHANNEL, AlertTriggered::REQUIRED_PLAN),
            (
                CircuitBreakerStateChange::CHANNEL,
                CircuitBreakerStateChange::REQUIRED_PLAN,
            ),
            (RequestLogEntry::CHANNEL, RequestLogEntry::REQUIRED_PLAN),
            (ApiStatusUpdate::CHANNEL, ApiStatusUpdate::REQUIRED_PLAN),
        ]
        .into_iter()
        .map(|(channel, plan)| (channel.to_string(), plan))
        .collect();

        Self {
            default_requirement: Plan::Pro,
            requirements,
        }
    }
}

impl AccessGate {
    /// Gate with the built-in requirement table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the requirement for one channel.
    ///
    /// # Errors
    ///
    /// Returns an error when asked to open a channel to the free plan, which
    /// never receives live data.
    pub fn with_requirement(mut self, channel: impl Into<String>, plan: Plan) -> LiveResult<Self> {
        let channel = channel.into();
        if plan == Plan::Free {
            return Err(LiveError::Config(format!(
                "channel '{channel}' cannot be opened to the free plan"
            )));
        }
        self.requirements.insert(channel, plan);
        Ok(self)
    }

    /// Required plan for `channel`. Channels not in the table require `pro`.
    #[must_use]
    pub fn requirement(&self, channel: &str) -> Plan {
        self.requirements
            .get(channel)
            .copied()
            .unwrap_or(self.default_requirement)
    }

    /// Whether `plan` may receive `channel` live.
    #[must_use]
    pub fn allows(&self, plan: Option<Plan>, channel: &str) -> bool {
        has_access(plan, self.requirement(channel))
    }

    /// Known channels with their requirement, sorted by channel name.
    #[must_use]
    pub fn table(&self) -> Vec<(String, Plan)> {
        let mut rows: Vec<(String, Plan)> = KNOWN_CHANNELS
            .iter()
            .map(|c| (*c).to_string())
            .chain(self.requirements.keys().cloned())
            .map(|c| {
                let plan = self.requirement(&c);
                (c, plan)
            })
            .collect();
        rows.sort();
        rows.dedup();
        rows
    }
}
