//! Typed per-feature feeds.
//!
//! A [`Feature`] ties a payload type to its aggregation. [`Feed`] wraps a
//! [`LiveFacade`] for that feature's channel, decodes payloads, and applies an
//! optional per-API filter. [`LiveView`] keeps the aggregated view up to date.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use ratelane_proto::{
    AlertTriggered, ApiStatusUpdate, CircuitBreakerStateChange, DashboardStats, LivePayload,
    RequestLogEntry, UsageDatapoint,
};

use crate::aggregate::{
    Aggregation, Aggregator, LatestByApi, LatestValue, RecentBuffer, UsageSeries,
};
use crate::facade::{FacadeStatus, LiveFacade};
use crate::provider::LiveProvider;
use crate::router::Subscription;

/// Alerts kept by the alerts feed.
pub const ALERT_HISTORY: usize = 50;

/// Requests kept by the request stream.
pub const REQUEST_WINDOW: usize = 100;

/// A dashboard feature backed by one live channel.
pub trait Feature: Send + Sync + 'static {
    /// Payload type; its `CHANNEL` is the feature's channel.
    type Payload: LivePayload + Clone;

    /// Aggregated view.
    type View: Aggregator<Self::Payload>;

    /// Short name for logs and the CLI.
    const NAME: &'static str;

    /// How payloads are folded.
    const AGGREGATION: Aggregation;

    /// Empty view.
    fn new_view() -> Self::View;
}

/// Usage charts.
#[derive(Debug, Clone, Copy)]
pub struct Usage;

impl Feature for Usage {
    type Payload = UsageDatapoint;
    type View = UsageSeries;
    const NAME: &'static str = "usage";
    const AGGREGATION: Aggregation = Aggregation::PerMinute;

    fn new_view() -> Self::View {
        UsageSeries::default()
    }
}

/// Headline dashboard statistics.
#[derive(Debug, Clone, Copy)]
pub struct Stats;

impl Feature for Stats {
    type Payload = DashboardStats;
    type View = LatestValue<DashboardStats>;
    const NAME: &'static str = "stats";
    const AGGREGATION: Aggregation = Aggregation::Latest;

    fn new_view() -> Self::View {
        LatestValue::default()
    }
}

/// Alert list.
#[derive(Debug, Clone, Copy)]
pub struct Alerts;

impl Feature for Alerts {
    type Payload = AlertTriggered;
    type View = RecentBuffer<AlertTriggered>;
    const NAME: &'static str = "alerts";
    const AGGREGATION: Aggregation = Aggregation::Window(ALERT_HISTORY);

    fn new_view() -> Self::View {
        RecentBuffer::new(ALERT_HISTORY)
    }
}

/// Circuit breaker panel.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakers;

impl Feature for CircuitBreakers {
    type Payload = CircuitBreakerStateChange;
    type View = LatestByApi<CircuitBreakerStateChange>;
    const NAME: &'static str = "circuit-breakers";
    const AGGREGATION: Aggregation = Aggregation::LatestPerApi;

    fn new_view() -> Self::View {
        LatestByApi::default()
    }
}

/// Live request log.
#[derive(Debug, Clone, Copy)]
pub struct RequestStream;

impl Feature for RequestStream {
    type Payload = RequestLogEntry;
    type View = RecentBuffer<RequestLogEntry>;
    const NAME: &'static str = "requests";
    const AGGREGATION: Aggregation = Aggregation::Window(REQUEST_WINDOW);

    fn new_view() -> Self::View {
        RecentBuffer::new(REQUEST_WINDOW)
    }
}

/// API health board.
#[derive(Debug, Clone, Copy)]
pub struct ApiStatus;

impl Feature for ApiStatus {
    type Payload = ApiStatusUpdate;
    type View = LatestByApi<ApiStatusUpdate>;
    const NAME: &'static str = "api-status";
    const AGGREGATION: Aggregation = Aggregation::LatestPerApi;

    fn new_view() -> Self::View {
        LatestByApi::default()
    }
}

/// Usage feed.
pub type UsageFeed = Feed<Usage>;
/// Stats feed.
pub type StatsFeed = Feed<Stats>;
/// Alerts feed.
pub type AlertsFeed = Feed<Alerts>;
/// Circuit breaker feed.
pub type CircuitBreakerFeed = Feed<CircuitBreakers>;
/// Request stream feed.
pub type RequestStreamFeed = Feed<RequestStream>;
/// API status feed.
pub type ApiStatusFeed = Feed<ApiStatus>;

/// Typed façade for one feature.
pub struct Feed<F> {
    facade: LiveFacade,
    api_id: Option<String>,
    _feature: PhantomData<fn() -> F>,
}

impl<F> Clone for Feed<F> {
    fn clone(&self) -> Self {
        Self {
            facade: self.facade.clone(),
            api_id: self.api_id.clone(),
            _feature: PhantomData,
        }
    }
}

impl<F: Feature> fmt::Debug for Feed<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feed")
            .field("feature", &F::NAME)
            .field("api_id", &self.api_id)
            .field("facade", &self.facade)
            .finish()
    }
}

impl<F: Feature> Feed<F> {
    /// Feed over `provider`'s live channel.
    #[must_use]
    pub fn new(provider: &Arc<LiveProvider>) -> Self {
        Self {
            facade: provider.facade(F::Payload::CHANNEL),
            api_id: None,
            _feature: PhantomData,
        }
    }

    /// Only deliver payloads concerning `api_id`.
    ///
    /// Payloads without an API scope always pass.
    #[must_use]
    pub fn for_api(mut self, api_id: impl Into<String>) -> Self {
        self.api_id = Some(api_id.into());
        self
    }

    /// Active API filter.
    #[must_use]
    pub fn api_id(&self) -> Option<&str> {
        self.api_id.as_deref()
    }

    /// Underlying untyped façade.
    #[must_use]
    pub const fn facade(&self) -> &LiveFacade {
        &self.facade
    }

    /// How this feature aggregates.
    #[must_use]
    pub const fn aggregation(&self) -> Aggregation {
        F::AGGREGATION
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> FacadeStatus {
        self.facade.status()
    }

    /// Whether the current plan may receive this feature live.
    #[must_use]
    pub fn has_access(&self) -> bool {
        self.facade.has_access()
    }

    /// True iff the channel is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.facade.is_connected()
    }

    /// Manual reconnect.
    pub fn reconnect(&self) {
        self.facade.reconnect();
    }

    fn passes(&self, payload: &F::Payload) -> bool {
        matches_api(self.api_id.as_deref(), payload)
    }

    /// Register a typed handler.
    ///
    /// Payloads that fail to decode are reported to the router, which logs
    /// them; other handlers are unaffected.
    pub fn subscribe<H>(&self, handler: H) -> Subscription
    where
        H: Fn(F::Payload) + Send + Sync + 'static,
    {
        let api_id = self.api_id.clone();
        self.facade.subscribe(F::Payload::CHANNEL, move |data| {
            let payload = F::Payload::decode(data)?;
            if matches_api(api_id.as_deref(), &payload) {
                handler(payload);
            }
            Ok(())
        })
    }

    /// Subscribe and keep an aggregated view.
    #[must_use]
    pub fn attach(&self) -> LiveView<F> {
        let view = Arc::new(Mutex::new(F::new_view()));
        let subscription = self.register_view(&view);
        LiveView {
            feed: self.clone(),
            view,
            subscription,
        }
    }

    fn register_view(&self, view: &Arc<Mutex<F::View>>) -> Subscription {
        let view = Arc::clone(view);
        self.subscribe(move |payload| view.lock().push(payload))
    }
}

fn matches_api<P: LivePayload>(wanted: Option<&str>, payload: &P) -> bool {
    match (wanted, payload.api_id()) {
        (Some(wanted), Some(actual)) => wanted == actual,
        _ => true,
    }
}

/// An aggregated view fed by a live subscription.
///
/// Dropping the view unsubscribes.
pub struct LiveView<F: Feature> {
    feed: Feed<F>,
    view: Arc<Mutex<F::View>>,
    subscription: Subscription,
}

impl<F: Feature> fmt::Debug for LiveView<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveView")
            .field("feed", &self.feed)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

impl<F: Feature> LiveView<F> {
    /// Read the view.
    pub fn read<R>(&self, f: impl FnOnce(&F::View) -> R) -> R {
        f(&self.view.lock())
    }

    /// Fold in a payload obtained elsewhere, e.g. from polling.
    ///
    /// The feed's API filter applies.
    pub fn push(&self, payload: F::Payload) {
        if self.feed.passes(&payload) {
            self.view.lock().push(payload);
        }
    }

    /// Whether the live subscription is registered.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.subscription.is_active()
    }

    /// The feed behind this view.
    #[must_use]
    pub const fn feed(&self) -> &Feed<F> {
        &self.feed
    }

    /// Re-check access and (un)register accordingly.
    ///
    /// Call on every render: after a plan upgrade this registers the live
    /// handler, after a downgrade it drops it. Existing data is kept.
    pub fn sync(&mut self) -> FacadeStatus {
        let status = self.feed.status();
        if status.has_access && !self.subscription.is_active() {
            self.subscription = self.feed.register_view(&self.view);
        } else if !status.has_access && self.subscription.is_active() {
            self.subscription.unsubscribe();
        }
        status
    }
}
