//! Per-feature live façade.
//!
//! A [`LiveFacade`] is what a feature sees of the live subsystem: the
//! connection status, whether its plan has access, a gated `subscribe`, and
//! a manual reconnect. `has_access` is recomputed on every call.

use std::fmt;
use std::sync::Arc;

use ratelane_proto::Plan;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::polling::{self, PollDecision};
use crate::provider::LiveProvider;
use crate::router::Subscription;
use crate::state::ConnectionState;

/// Snapshot of what a feature needs to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FacadeStatus {
    /// Connection state.
    pub status: ConnectionState,
    /// `status == connected`.
    pub is_connected: bool,
    /// Whether the current plan may receive this feature live.
    pub has_access: bool,
}

impl FacadeStatus {
    /// Build a snapshot; `is_connected` is derived from `status`.
    #[must_use]
    pub const fn new(status: ConnectionState, has_access: bool) -> Self {
        Self {
            status,
            is_connected: status.is_connected(),
            has_access,
        }
    }

    /// Whether the feature should fall back to polling.
    #[must_use]
    pub fn should_poll(&self) -> bool {
        polling::should_poll(self.has_access, self.status)
    }

    /// Whether a disconnection banner with a retry action applies.
    ///
    /// Users without access never see it; they are not using live mode.
    #[must_use]
    pub const fn shows_disconnect_banner(&self) -> bool {
        self.has_access && self.status.is_down()
    }
}

/// A feature's view of the live subsystem.
#[derive(Clone)]
pub struct LiveFacade {
    provider: Arc<LiveProvider>,
    channel: String,
}

impl fmt::Debug for LiveFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFacade")
            .field("channel", &self.channel)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl LiveFacade {
    pub(crate) fn new(provider: Arc<LiveProvider>, channel: impl Into<String>) -> Self {
        Self {
            provider,
            channel: channel.into(),
        }
    }

    /// The feature's primary channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Plan required for the primary channel.
    #[must_use]
    pub fn required_plan(&self) -> Plan {
        self.provider.gate().requirement(&self.channel)
    }

    /// Connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.provider.state()
    }

    /// True iff the channel is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Whether the current plan may receive the primary channel.
    #[must_use]
    pub fn has_access(&self) -> bool {
        self.provider
            .gate()
            .allows(self.provider.current_plan(), &self.channel)
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> FacadeStatus {
        FacadeStatus::new(self.state(), self.has_access())
    }

    /// Live or poll, with the provider's intervals.
    #[must_use]
    pub fn poll_decision(&self) -> PollDecision {
        self.provider
            .polling_policy()
            .decide(self.has_access(), self.state())
    }

    /// Register `handler` for `channel`.
    ///
    /// Without access to `channel` nothing is registered and an inactive
    /// [`Subscription`] is returned; denied subscriptions never open the
    /// live channel.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let plan = self.provider.current_plan();
        if !self.provider.gate().allows(plan, channel) {
            debug!(
                channel,
                plan = plan.map_or("unknown", Plan::as_str),
                "live access denied, handler not registered"
            );
            return Subscription::inert(channel);
        }
        self.provider.router().register(channel, handler)
    }

    /// Manual reconnect, e.g. from a "Retry now" action.
    ///
    /// Does nothing once the provider is shut down.
    pub fn reconnect(&self) {
        self.provider.reconnect();
    }

    /// Watch for anything that may change [`status`](Self::status).
    #[must_use]
    pub fn watch(&self) -> FacadeWatch {
        FacadeWatch {
            state: self.provider.manager().watch_state(),
            plan: self.provider.watch_plan(),
        }
    }
}

/// Change notifications for a [`LiveFacade`].
#[derive(Debug, Clone)]
pub struct FacadeWatch {
    state: watch::Receiver<ConnectionState>,
    plan: watch::Receiver<Option<Plan>>,
}

impl FacadeWatch {
    /// Wait until the connection state or the plan changes.
    ///
    /// Pends forever once the provider is gone.
    pub async fn changed(&mut self) {
        tokio::select! {
            Ok(()) = self.state.changed() => {}
            Ok(()) = self.plan.changed() => {}
            else => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ConnectionState::Connected, true => (true, false, false))]
    #[test_case(ConnectionState::Reconnecting, true => (false, false, false))]
    #[test_case(ConnectionState::Error, true => (false, true, true))]
    #[test_case(ConnectionState::Error, false => (false, true, false))]
    #[test_case(ConnectionState::Connected, false => (true, true, false))]
    fn test_status_derivations(status: ConnectionState, has_access: bool) -> (bool, bool, bool) {
        let s = FacadeStatus::new(status, has_access);
        (s.is_connected, s.should_poll(), s.shows_disconnect_banner())
    }

    #[test]
    fn test_status_serializes_flat() {
        let json = serde_json::to_value(FacadeStatus::new(ConnectionState::Connected, true)).unwrap();
        assert_eq!(json["status"], "connected");
        assert_eq!(json["is_connected"], true);
        assert_eq!(json["has_access"], true);
    }
}
