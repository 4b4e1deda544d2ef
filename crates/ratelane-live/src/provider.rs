//! The live provider: owns the one connection manager and router for an
//! authenticated session and hands out façades.
//!
//! The channel opens lazily when the first subscriber registers and closes
//! `idle_timeout` after the last one leaves.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use ratelane_proto::{ClientMessage, Plan};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::access::AccessGate;
use crate::config::LiveConfig;
use crate::error::LiveResult;
use crate::facade::LiveFacade;
use crate::feeds::{Feature, Feed};
use crate::manager::ConnectionManager;
use crate::polling::PollingPolicy;
use crate::router::EventRouter;
use crate::state::ConnectionState;
use crate::transport::{Connector, WsConnector};

#[derive(Default)]
struct Lifecycle {
    idle_close: Option<CancellationToken>,
    shut_down: bool,
}

/// Owner of the live subsystem for one session.
pub struct LiveProvider {
    manager: Arc<ConnectionManager>,
    router: Arc<EventRouter>,
    gate: AccessGate,
    polling: PollingPolicy,
    idle_timeout: Duration,
    plan: watch::Sender<Option<Plan>>,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for LiveProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveProvider")
            .field("manager", &self.manager)
            .field("plan", &self.current_plan())
            .field("subscribers", &self.router.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl LiveProvider {
    /// Build a provider over `connector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the access overrides in `config` are invalid.
    pub fn new(config: &LiveConfig, connector: Arc<dyn Connector>) -> LiveResult<Arc<Self>> {
        let router = EventRouter::new();
        let manager = ConnectionManager::with_queue_capacity(
            connector,
            Arc::clone(&router),
            config.reconnect_policy(),
            config.send_queue_capacity,
        );
        let (plan, _) = watch::channel(None);

        let provider = Arc::new(Self {
            manager,
            router,
            gate: config.access_gate()?,
            polling: config.polling_policy(),
            idle_timeout: config.idle_timeout(),
            plan,
            lifecycle: Mutex::new(Lifecycle::default()),
        });

        let weak: Weak<Self> = Arc::downgrade(&provider);
        provider.router.set_occupancy_listener(Arc::new(move || {
            if let Some(provider) = weak.upgrade() {
                provider.on_occupancy_changed();
            }
        }));

        Ok(provider)
    }

    /// Validate `config` and build a provider over a WebSocket.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn connect_ws(config: &LiveConfig) -> LiveResult<Arc<Self>> {
        config.validate()?;
        let connector = WsConnector::new(config.url.clone())?.with_hello(ClientMessage::hello(
            config.client_name.clone(),
            env!("CARGO_PKG_VERSION"),
        ));
        Self::new(config, Arc::new(connector))
    }

    /// Set the current user's plan. `None` means no user is loaded.
    ///
    /// Façades pick the change up on their next access check.
    pub fn set_plan(&self, plan: Option<Plan>) {
        let changed = self.plan.send_if_modified(|current| {
            if *current == plan {
                return false;
            }
            *current = plan;
            true
        });
        if changed {
            info!(plan = plan.map_or("unknown", Plan::as_str), "plan changed");
        }
    }

    /// Current plan.
    #[must_use]
    pub fn current_plan(&self) -> Option<Plan> {
        *self.plan.borrow()
    }

    /// Watch plan changes.
    #[must_use]
    pub fn watch_plan(&self) -> watch::Receiver<Option<Plan>> {
        self.plan.subscribe()
    }

    /// Connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Façade for a feature whose primary channel is `channel`.
    #[must_use]
    pub fn facade(self: &Arc<Self>, channel: impl Into<String>) -> LiveFacade {
        LiveFacade::new(Arc::clone(self), channel)
    }

    /// Typed feed for feature `F`.
    #[must_use]
    pub fn feed<F: Feature>(self: &Arc<Self>) -> Feed<F> {
        Feed::new(self)
    }

    /// The connection manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// The event router.
    #[must_use]
    pub const fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// The access gate.
    #[must_use]
    pub const fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Polling intervals.
    #[must_use]
    pub const fn polling_policy(&self) -> &PollingPolicy {
        &self.polling
    }

    /// Tear everything down, e.g. on logout.
    ///
    /// Later subscribers no longer open the channel.
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.shut_down = true;
        if let Some(token) = lifecycle.idle_close.take() {
            token.cancel();
        }
        self.manager.disconnect();
        drop(lifecycle);
        info!("live provider shut down");
    }

    fn on_occupancy_changed(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.shut_down {
            return;
        }

        if self.router.subscriber_count() > 0 {
            if let Some(token) = lifecycle.idle_close.take() {
                debug!("subscriber returned, idle close cancelled");
                token.cancel();
            }
            if self.manager.state() == ConnectionState::Disconnected {
                info!("first subscriber registered, opening live channel");
                self.manager.connect();
            }
            return;
        }

        if lifecycle.idle_close.is_some() || self.manager.state() == ConnectionState::Disconnected {
            return;
        }

        if self.idle_timeout.is_zero() {
            info!("last subscriber left, closing live channel");
            self.manager.disconnect();
            return;
        }

        debug!(idle_ms = self.idle_timeout.as_millis() as u64, "last subscriber left, scheduling close");
        self.schedule_idle_close(&mut lifecycle);
    }

    /// Manual reconnect, the "Retry now" action.
    ///
    /// Ignored after [`shutdown`](Self::shutdown). Without subscribers the
    /// reopened channel is closed again after the idle timeout.
    pub fn reconnect(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.shut_down {
            debug!("reconnect ignored, provider shut down");
            return;
        }

        let idle = self.router.subscriber_count() == 0;
        if idle && self.idle_timeout.is_zero() {
            debug!("reconnect ignored, no subscribers");
            return;
        }

        self.manager.reconnect();
        if idle && lifecycle.idle_close.is_none() {
            self.schedule_idle_close(&mut lifecycle);
        }
    }

    fn schedule_idle_close(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        let Ok(runtime) = Handle::try_current() else {
            self.manager.disconnect();
            return;
        };

        let token = CancellationToken::new();
        lifecycle.idle_close = Some(token.clone());

        let weak = Arc::downgrade(self);
        let timeout = self.idle_timeout;
        runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if let Some(provider) = weak.upgrade() {
                        provider.close_if_idle(&token);
                    }
                }
            }
        });
    }

    fn close_if_idle(&self, token: &CancellationToken) {
        let mut lifecycle = self.lifecycle.lock();
        if token.is_cancelled() {
            return;
        }
        lifecycle.idle_close = None;
        if self.router.subscriber_count() == 0 {
            info!("live channel idle, closing");
            self.manager.disconnect();
        }
    }
}

impl Drop for LiveProvider {
    fn drop(&mut self) {
        if let Some(token) = self.lifecycle.get_mut().idle_close.take() {
            token.cancel();
        }
        self.manager.disconnect();
    }
}
