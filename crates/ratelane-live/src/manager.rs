//! Connection manager: owns the single live channel.
//!
//! The manager opens links through a [`Connector`], parses inbound frames
//! into [`InboundEvent`]s for the [`EventRouter`], and keeps the channel
//! alive with exponential backoff. It knows nothing about what the payloads
//! mean.
//!
//! Every state transition made by a running session goes through the
//! `inner` lock together with a generation check, so a session that was
//! cancelled by [`ConnectionManager::disconnect`] can never write state
//! afterwards.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use ratelane_proto::{ClientMessage, InboundEvent};
use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::LiveError;
use crate::events::ConnectionEvent;
use crate::reconnect::ReconnectPolicy;
use crate::router::EventRouter;
use crate::state::{ConnectionState, SharedConnectionState};
use crate::transport::{Connector, TransportFrame};

/// Capacity of the lifecycle event broadcast.
const EVENT_BUFFER: usize = 32;

/// Default capacity of the offline send queue.
pub const DEFAULT_SEND_QUEUE: usize = 64;

struct Session {
    cancel: CancellationToken,
    retry_now: Arc<Notify>,
}

#[derive(Default)]
struct ManagerInner {
    generation: u64,
    session: Option<Session>,
    outbound: Option<mpsc::Sender<String>>,
    queue: VecDeque<String>,
}

/// Owns the live channel and its lifecycle.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    router: Arc<EventRouter>,
    policy: ReconnectPolicy,
    queue_capacity: usize,
    state: SharedConnectionState,
    attempts: AtomicU32,
    events: broadcast::Sender<ConnectionEvent>,
    inner: Mutex<ManagerInner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state())
            .field("attempts", &self.reconnect_attempts())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. Nothing is opened until [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        router: Arc<EventRouter>,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        Self::with_queue_capacity(connector, router, policy, DEFAULT_SEND_QUEUE)
    }

    /// Create a manager with a custom offline send queue capacity.
    #[must_use]
    pub fn with_queue_capacity(
        connector: Arc<dyn Connector>,
        router: Arc<EventRouter>,
        policy: ReconnectPolicy,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            connector,
            router,
            policy,
            queue_capacity: queue_capacity.max(1),
            state: SharedConnectionState::default(),
            attempts: AtomicU32::new(0),
            events,
            inner: Mutex::new(ManagerInner::default()),
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// True iff the state is `connected`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Consecutive failed attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The reconnect policy in use.
    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Messages waiting for the channel to open.
    #[must_use]
    pub fn queued_messages(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Open the channel.
    ///
    /// - `connected` / `connecting`: no-op.
    /// - `reconnecting`: skip the remaining backoff wait and retry now.
    /// - `disconnected` / `error`: start a fresh session with the attempt
    ///   counter at zero.
    ///
    /// Never fails; problems show up as state.
    pub fn connect(self: &Arc<Self>) {
        let mut inner = self.inner.lock();

        match self.state.load() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                debug!(state = %self.state.load(), "connect ignored, channel already active");
                return;
            }
            ConnectionState::Reconnecting => {
                if let Some(session) = &inner.session {
                    // Wakes a pending backoff only; an attempt already in
                    // flight keeps no permit for a later backoff.
                    debug!("retrying live channel now");
                    session.retry_now.notify_waiters();
                    return;
                }
            }
            ConnectionState::Disconnected | ConnectionState::Error => {}
        }

        let Ok(runtime) = Handle::try_current() else {
            error!(error = %LiveError::RuntimeUnavailable, "cannot open live channel");
            self.state.store(ConnectionState::Error);
            return;
        };

        if let Some(old) = inner.session.take() {
            old.cancel.cancel();
        }
        inner.generation += 1;
        inner.outbound = None;
        let generation = inner.generation;

        let session = Session {
            cancel: CancellationToken::new(),
            retry_now: Arc::new(Notify::new()),
        };
        let cancel = session.cancel.clone();
        let retry_now = Arc::clone(&session.retry_now);
        inner.session = Some(session);

        self.attempts.store(0, Ordering::SeqCst);
        self.state.store(ConnectionState::Connecting);
        drop(inner);

        info!(endpoint = %self.connector.endpoint(), "opening live channel");
        let this = Arc::clone(self);
        runtime.spawn(async move {
            this.supervise(generation, cancel, retry_now).await;
        });
    }

    /// Same as [`connect`](Self::connect); backs the "Retry now" action.
    pub fn reconnect(self: &Arc<Self>) {
        self.connect();
    }

    /// Close the channel and cancel any pending reconnect.
    ///
    /// Queued outbound messages are discarded.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        if let Some(session) = inner.session.take() {
            session.cancel.cancel();
        }
        // Dropping the sender closes the link.
        inner.outbound = None;
        inner.queue.clear();
        self.attempts.store(0, Ordering::SeqCst);
        let changed = self.state.store(ConnectionState::Disconnected);
        drop(inner);

        if changed {
            info!("live channel closed");
            let _ = self.events.send(ConnectionEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
        }
    }

    /// Send a message, queueing it while the channel is not connected.
    ///
    /// When the queue is full the oldest message is dropped.
    pub fn send(&self, message: &ClientMessage) {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "dropping unserializable outbound message");
                return;
            }
        };

        let mut inner = self.inner.lock();
        let json = match &inner.outbound {
            Some(tx) => match tx.try_send(json) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(json) | mpsc::error::TrySendError::Closed(json)) => json,
            },
            None => json,
        };

        if inner.queue.len() >= self.queue_capacity {
            inner.queue.pop_front();
            warn!(capacity = self.queue_capacity, "send queue full, dropped oldest message");
        }
        inner.queue.push_back(json);
    }

    /// Handle one raw text frame.
    ///
    /// Malformed frames are logged and dropped; they never affect the
    /// connection.
    pub fn on_message(&self, text: &str) {
        match InboundEvent::parse(text) {
            Ok(event) => {
                let delivered = self.router.dispatch(&event);
                debug!(channel = %event.channel, delivered, "dispatched event");
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
            }
        }
    }

    async fn supervise(
        self: Arc<Self>,
        generation: u64,
        cancel: CancellationToken,
        retry_now: Arc<Notify>,
    ) {
        let mut rng = StdRng::from_entropy();

        loop {
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = self.connector.open() => result,
            };

            let last_error = match opened {
                Ok(link) => {
                    if !self.on_open(generation, link.outbound) {
                        return;
                    }
                    let opened_at = Instant::now();

                    let Some(reason) = self.pump(link.inbound, &cancel).await else {
                        return;
                    };
                    if !self.on_closed(generation, &reason) {
                        return;
                    }

                    // Links that survive at least one base delay reconnect
                    // immediately; shorter ones wait one base delay, since
                    // the open reset the attempt counter.
                    if opened_at.elapsed() >= self.policy.base_delay {
                        continue;
                    }
                    reason
                }
                Err(e) => {
                    warn!(endpoint = %self.connector.endpoint(), error = %e, "live channel connect failed");
                    e.to_string()
                }
            };

            if !self
                .backoff(generation, &last_error, &cancel, &retry_now, &mut rng)
                .await
            {
                return;
            }
        }
    }

    /// Record a failure and wait before the next attempt.
    ///
    /// Returns `false` when the session should end.
    async fn backoff(
        &self,
        generation: u64,
        last_error: &str,
        cancel: &CancellationToken,
        retry_now: &Notify,
        rng: &mut StdRng,
    ) -> bool {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.policy.should_retry(attempt) {
            if self.transition(generation, ConnectionState::Error) {
                error!(attempts = attempt, error = %last_error, "live channel gave up reconnecting");
                let _ = self.events.send(ConnectionEvent::ReconnectFailed {
                    attempts: attempt,
                    last_error: last_error.to_string(),
                });
            }
            return false;
        }

        // Registered before the state flips so a retry-now issued as soon as
        // `reconnecting` is visible still lands.
        let notified = retry_now.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.transition(generation, ConnectionState::Reconnecting) {
            return false;
        }

        let delay = self.policy.jittered_delay(attempt, rng);
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling live channel reconnect");
        let _ = self
            .events
            .send(ConnectionEvent::Reconnecting { attempt, delay });

        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = &mut notified => {
                debug!(attempt, "backoff skipped by explicit reconnect");
                true
            }
            () = sleep(delay) => true,
        }
    }

    /// Store `state` if `generation` is still current.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        self.state.store(state);
        true
    }

    fn on_open(&self, generation: u64, outbound: mpsc::Sender<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }

        let mut flushed = 0usize;
        while let Some(json) = inner.queue.pop_front() {
            match outbound.try_send(json) {
                Ok(()) => flushed += 1,
                Err(mpsc::error::TrySendError::Full(json)) => {
                    inner.queue.push_front(json);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(json)) => {
                    inner.queue.push_front(json);
                    break;
                }
            }
        }

        inner.outbound = Some(outbound);
        self.attempts.store(0, Ordering::SeqCst);
        self.state.store(ConnectionState::Connected);
        drop(inner);

        info!(endpoint = %self.connector.endpoint(), flushed, "live channel connected");
        let _ = self.events.send(ConnectionEvent::Connected);
        true
    }

    fn on_closed(&self, generation: u64, reason: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.outbound = None;
        self.state.store(ConnectionState::Reconnecting);
        drop(inner);

        warn!(%reason, "live channel dropped");
        let _ = self.events.send(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });
        true
    }

    /// Feed inbound frames to the router until the link closes.
    ///
    /// Returns `None` if the session was cancelled.
    async fn pump(
        &self,
        mut inbound: mpsc::Receiver<TransportFrame>,
        cancel: &CancellationToken,
    ) -> Option<String> {
        loop {
            let frame = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                frame = inbound.recv() => frame,
            };

            match frame {
                Some(TransportFrame::Text(text)) => self.on_message(&text),
                Some(TransportFrame::Closed { reason }) => return Some(reason),
                None => return Some("transport closed".to_string()),
            }
        }
    }
}
