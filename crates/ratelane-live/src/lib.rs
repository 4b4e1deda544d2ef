//! # ratelane-live
//!
//! Real-time updates for the Ratelane dashboard.
//!
//! One [`LiveProvider`] per authenticated session owns a single
//! [`ConnectionManager`] (the WebSocket and its reconnect loop) and a single
//! [`EventRouter`] (channel name to handlers). Features talk to it through a
//! [`LiveFacade`] or a typed [`Feed`], which gate subscriptions on the
//! user's [`Plan`](ratelane_proto::Plan) and tell the feature when to fall
//! back to polling.
//!
//! ```no_run
//! use ratelane_live::{LiveConfig, LiveProvider, feeds::Usage};
//! use ratelane_proto::Plan;
//!
//! # fn demo() -> ratelane_live::LiveResult<()> {
//! let provider = LiveProvider::connect_ws(&LiveConfig::new("wss://app.example.com/api/v1/ws"))?;
//! provider.set_plan(Some(Plan::Pro));
//!
//! let usage = provider.feed::<Usage>().for_api("payments");
//! let view = usage.attach();
//! if usage.status().should_poll() {
//!     // fetch over REST instead
//! }
//! # drop(view);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod feeds;
pub mod manager;
pub mod polling;
pub mod provider;
pub mod reconnect;
pub mod router;
pub mod state;
pub mod transport;

pub use access::{AccessGate, has_access};
pub use aggregate::{Aggregation, Aggregator, LatestByApi, LatestValue, RecentBuffer, UsageSeries};
pub use config::{LiveConfig, PollingSettings, ReconnectSettings};
pub use error::{LiveError, LiveResult};
pub use events::ConnectionEvent;
pub use facade::{FacadeStatus, FacadeWatch, LiveFacade};
pub use feeds::{Feature, Feed, LiveView};
pub use manager::ConnectionManager;
pub use polling::{
    FallbackPoller, FetchFuture, Fetcher, PollDecision, PollReason, PollingPolicy, RestFetcher,
    should_poll,
};
pub use provider::LiveProvider;
pub use reconnect::ReconnectPolicy;
pub use router::{EventRouter, Handler, Subscription, SubscriptionId};
pub use state::{ConnectionState, SharedConnectionState};
pub use transport::{ConnectFuture, Connector, TransportFrame, TransportLink, WsConnector};
