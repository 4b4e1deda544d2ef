//! Live subsystem configuration.
//!
//! Loaded from TOML; every section except `url` is optional:
//!
//! ```toml
//! url = "wss://app.example.com/api/v1/ws"
//! idle_timeout_ms = 5000
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 10
//!
//! [polling]
//! no_access_interval_ms = 30000
//! degraded_interval_ms = 60000
//!
//! [access]
//! "request.log" = "enterprise"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use ratelane_proto::Plan;
use serde::{Deserialize, Serialize};

use crate::access::AccessGate;
use crate::error::{LiveError, LiveResult};
use crate::manager::DEFAULT_SEND_QUEUE;
use crate::polling::PollingPolicy;
use crate::reconnect::ReconnectPolicy;

/// Backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per failure.
    pub multiplier: f64,
    /// Jitter ratio in `[0, 1]`.
    pub jitter: f64,
    /// Consecutive failures before giving up.
    pub max_attempts: u32,
    /// Ignore `max_attempts` and never give up.
    pub retry_forever: bool,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 10,
            retry_forever: false,
        }
    }
}

/// Polling fallback intervals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollingSettings {
    /// Interval without live access, in milliseconds.
    pub no_access_interval_ms: u64,
    /// Interval while degraded, in milliseconds.
    pub degraded_interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            no_access_interval_ms: 30_000,
            degraded_interval_ms: 60_000,
        }
    }
}

fn default_send_queue_capacity() -> usize {
    DEFAULT_SEND_QUEUE
}

fn default_idle_timeout_ms() -> u64 {
    5000
}

fn default_client_name() -> String {
    "ratelane".to_string()
}

/// Configuration for a [`LiveProvider`](crate::LiveProvider).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveConfig {
    /// Push endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Name sent in the hello message.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Outbound messages kept while disconnected.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    /// Grace period before closing once the last subscriber leaves.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Backoff.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Polling fallback.
    #[serde(default)]
    pub polling: PollingSettings,
    /// Per-channel plan overrides.
    #[serde(default)]
    pub access: BTreeMap<String, Plan>,
}

impl LiveConfig {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_name: default_client_name(),
            send_queue_capacity: DEFAULT_SEND_QUEUE,
            idle_timeout_ms: default_idle_timeout_ms(),
            reconnect: ReconnectSettings::default(),
            polling: PollingSettings::default(),
            access: BTreeMap::new(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> LiveResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            LiveError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> LiveResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LiveError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> LiveResult<()> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(LiveError::Config(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        let r = &self.reconnect;
        if r.base_delay_ms == 0 {
            return Err(LiveError::Config(
                "reconnect.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return Err(LiveError::Config(
                "reconnect.max_delay_ms must be >= reconnect.base_delay_ms".to_string(),
            ));
        }
        if !(r.multiplier >= 1.0 && r.multiplier.is_finite()) {
            return Err(LiveError::Config(
                "reconnect.multiplier must be a finite number >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&r.jitter) {
            return Err(LiveError::Config(
                "reconnect.jitter must be between 0 and 1".to_string(),
            ));
        }
        if r.max_attempts == 0 {
            return Err(LiveError::Config(
                "reconnect.max_attempts must be greater than 0 (set retry_forever instead)"
                    .to_string(),
            ));
        }

        if self.send_queue_capacity == 0 {
            return Err(LiveError::Config(
                "send_queue_capacity must be greater than 0".to_string(),
            ));
        }

        let p = &self.polling;
        if p.no_access_interval_ms == 0 {
            return Err(LiveError::Config(
                "polling.no_access_interval_ms must be greater than 0".to_string(),
            ));
        }
        if p.degraded_interval_ms < p.no_access_interval_ms {
            return Err(LiveError::Config(
                "polling.degraded_interval_ms must be >= polling.no_access_interval_ms"
                    .to_string(),
            ));
        }

        if let Some(channel) = self
            .access
            .iter()
            .find_map(|(channel, plan)| (*plan == Plan::Free).then_some(channel))
        {
            return Err(LiveError::Config(format!(
                "access.\"{channel}\" cannot be the free plan"
            )));
        }

        Ok(())
    }

    /// Set the push endpoint.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the reconnect settings.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectSettings) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the polling intervals.
    #[must_use]
    pub fn with_polling(mut self, polling: PollingSettings) -> Self {
        self.polling = polling;
        self
    }

    /// Set the send queue capacity.
    #[must_use]
    pub const fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    /// Override the plan required for `channel`.
    #[must_use]
    pub fn with_access(mut self, channel: impl Into<String>, plan: Plan) -> Self {
        self.access.insert(channel.into(), plan);
        self
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Backoff policy.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            multiplier: self.reconnect.multiplier,
            jitter: self.reconnect.jitter,
            max_attempts: (!self.reconnect.retry_forever).then_some(self.reconnect.max_attempts),
        }
    }

    /// Polling policy.
    #[must_use]
    pub const fn polling_policy(&self) -> PollingPolicy {
        PollingPolicy {
            no_access_interval: Duration::from_millis(self.polling.no_access_interval_ms),
            degraded_interval: Duration::from_millis(self.polling.degraded_interval_ms),
        }
    }

    /// Access gate with the configured overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if an override opens a channel to the free plan.
    pub fn access_gate(&self) -> LiveResult<AccessGate> {
        self.access
            .iter()
            .try_fold(AccessGate::new(), |gate, (channel, plan)| {
                gate.with_requirement(channel.clone(), *plan)
            })
    }
}
