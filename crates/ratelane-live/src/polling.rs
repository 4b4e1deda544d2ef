//! Polling fallback.
//!
//! A feature shows live data only while the user has access *and* the
//! channel is not in `error`. Otherwise it polls its REST endpoint: on a
//! short interval when there is no access at all, and on a longer one while
//! live mode is merely degraded.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LiveError, LiveResult};
use crate::facade::LiveFacade;
use crate::state::ConnectionState;

/// Default poll interval for users without live access.
pub const DEFAULT_NO_ACCESS_INTERVAL: Duration = Duration::from_secs(30);

/// Default poll interval while live mode is degraded.
pub const DEFAULT_DEGRADED_INTERVAL: Duration = Duration::from_secs(60);

/// Whether a feature should poll instead of relying on live data.
///
/// `connecting` and `reconnecting` do not trigger polling; the feature keeps
/// its last data and shows a status indicator instead.
#[must_use]
pub fn should_poll(has_access: bool, status: ConnectionState) -> bool {
    !has_access || status == ConnectionState::Error
}

/// Why a feature is polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollReason {
    /// The plan does not include live data.
    NoAccess,
    /// Live mode gave up reconnecting.
    Degraded,
}

/// Live or poll, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PollDecision {
    /// Rely on the live channel.
    Live,
    /// Poll the REST endpoint.
    Poll {
        /// Time between fetches.
        interval: Duration,
        /// Why.
        reason: PollReason,
    },
}

impl PollDecision {
    /// True for [`PollDecision::Live`].
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Poll intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    /// Interval for users without live access.
    pub no_access_interval: Duration,
    /// Interval while live mode is degraded. Never shorter than
    /// `no_access_interval`.
    pub degraded_interval: Duration,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            no_access_interval: DEFAULT_NO_ACCESS_INTERVAL,
            degraded_interval: DEFAULT_DEGRADED_INTERVAL,
        }
    }
}

impl PollingPolicy {
    /// Decide between live and polling.
    #[must_use]
    pub fn decide(&self, has_access: bool, status: ConnectionState) -> PollDecision {
        if !has_access {
            PollDecision::Poll {
                interval: self.no_access_interval,
                reason: PollReason::NoAccess,
            }
        } else if status == ConnectionState::Error {
            PollDecision::Poll {
                interval: self.degraded_interval,
                reason: PollReason::Degraded,
            }
        } else {
            PollDecision::Live
        }
    }
}

/// Future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = LiveResult<serde_json::Value>> + Send + 'a>>;

/// Fetches a feature's data over REST.
pub trait Fetcher: Send + Sync {
    /// Fetch the current data.
    fn fetch(&self) -> FetchFuture<'_>;
}

/// [`Fetcher`] doing a JSON `GET` on a fixed URL.
#[derive(Debug, Clone)]
pub struct RestFetcher {
    client: reqwest::Client,
    url: String,
}

impl RestFetcher {
    /// Create a fetcher for an `http://` or `https://` URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an HTTP URL.
    pub fn new(url: impl Into<String>) -> LiveResult<Self> {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Create a fetcher sharing an existing client.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an HTTP URL.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> LiveResult<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| LiveError::Config(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LiveError::Config(format!(
                "polling url must start with http:// or https://, got '{url}'"
            )));
        }
        Ok(Self { client, url })
    }

    /// The polled URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get(&self) -> LiveResult<serde_json::Value> {
        let value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        Ok(value)
    }
}

impl Fetcher for RestFetcher {
    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(self.get())
    }
}

/// Drives a [`Fetcher`] according to a façade's [`PollDecision`].
///
/// The decision is re-evaluated whenever the connection state or the plan
/// changes, so the poller stops as soon as live data is available and
/// resumes when it is not.
pub struct FallbackPoller<F> {
    facade: LiveFacade,
    fetcher: F,
}

impl<F: Fetcher> FallbackPoller<F> {
    /// Create a poller for `facade`.
    pub const fn new(facade: LiveFacade, fetcher: F) -> Self {
        Self { facade, fetcher }
    }

    /// Run until `cancel` fires, handing every fetched document to `on_data`.
    ///
    /// Fetch errors are logged and retried on the next tick.
    pub async fn run<H>(&self, mut on_data: H, cancel: CancellationToken)
    where
        H: FnMut(serde_json::Value) + Send,
    {
        let mut watch = self.facade.watch();
        let mut last_fetch: Option<(Instant, PollReason)> = None;

        loop {
            let decision = self.facade.poll_decision();

            let (interval, reason) = match decision {
                PollDecision::Poll { interval, reason } => (interval, reason),
                PollDecision::Live => {
                    if last_fetch.take().is_some() {
                        debug!(channel = %self.facade.channel(), "live data available, polling paused");
                    }
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        () = watch.changed() => {}
                    }
                    continue;
                }
            };

            let now = Instant::now();
            let due = match last_fetch {
                Some((at, last_reason)) if last_reason == reason => at + interval,
                _ => now,
            };

            if due <= now {
                debug!(channel = %self.facade.channel(), ?reason, "polling");
                match self.fetcher.fetch().await {
                    Ok(value) => on_data(value),
                    Err(e) => warn!(channel = %self.facade.channel(), error = %e, "poll failed"),
                }
                last_fetch = Some((now, reason));
                continue;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = sleep_until(due) => {}
                () = watch.changed() => {}
            }
        }
    }
}
