//! Event router: one transport, many independent subscribers.
//!
//! Subscribers register a handler for an exact channel name and get back a
//! [`Subscription`] guard. Dispatch snapshots the channel's subscriber list
//! before invoking anything, so handlers may subscribe or unsubscribe
//! (themselves or others) while being called.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use ratelane_proto::InboundEvent;
use tracing::{debug, warn};

/// Identifier of one registration.
pub type SubscriptionId = u64;

/// Handler invoked with the untyped payload of each event.
pub type Handler = Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync>;

/// Called after the total subscriber count changes.
pub type OccupancyListener = Arc<dyn Fn() + Send + Sync>;

struct Entry {
    id: SubscriptionId,
    handler: Handler,
    active: Arc<AtomicBool>,
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
            active: Arc::clone(&self.active),
        }
    }
}

/// Multiplexes inbound events to per-channel subscriber sets.
pub struct EventRouter {
    next_id: AtomicU64,
    channels: Mutex<HashMap<String, Vec<Entry>>>,
    occupancy: RwLock<Option<OccupancyListener>>,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("channels", &self.channel_count())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
            occupancy: RwLock::new(None),
        })
    }

    /// Install the listener notified whenever the subscriber count changes.
    pub fn set_occupancy_listener(&self, listener: OccupancyListener) {
        *self.occupancy.write() = Some(listener);
    }

    /// Register `handler` for `channel`.
    ///
    /// The handler receives every event on `channel` dispatched from now until
    /// the returned guard is unsubscribed or dropped.
    pub fn register<F>(self: &Arc<Self>, channel: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.channels
            .lock()
            .entry(channel.clone())
            .or_default()
            .push(Entry {
                id,
                handler: Arc::new(handler),
                active: Arc::clone(&active),
            });

        debug!(channel = %channel, subscription = id, "registered subscriber");
        self.notify_occupancy();

        Subscription {
            id,
            channel,
            router: Arc::downgrade(self),
            active,
        }
    }

    /// Deliver `event` to every handler currently registered for its channel.
    ///
    /// Handler failures (errors or panics) are logged and do not stop delivery
    /// to the remaining handlers. Returns the number of handlers that accepted
    /// the event.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let snapshot: Vec<Entry> = match self.channels.lock().get(&event.channel) {
            Some(entries) => entries.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for entry in snapshot {
            // Unsubscribed by an earlier handler in this same dispatch.
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| (entry.handler)(&event.data))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        channel = %event.channel,
                        subscription = entry.id,
                        error = %e,
                        "subscriber failed to handle event"
                    );
                }
                Err(_) => {
                    warn!(
                        channel = %event.channel,
                        subscription = entry.id,
                        "subscriber panicked while handling event"
                    );
                }
            }
        }
        delivered
    }

    /// Total registrations across all channels.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.channels.lock().values().map(Vec::len).sum()
    }

    /// Registrations for one channel.
    #[must_use]
    pub fn channel_subscribers(&self, channel: &str) -> usize {
        self.channels.lock().get(channel).map_or(0, Vec::len)
    }

    /// Channels with at least one registration.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    fn remove(&self, channel: &str, id: SubscriptionId) {
        {
            let mut channels = self.channels.lock();
            if let Some(entries) = channels.get_mut(channel) {
                entries.retain(|entry| entry.id != id);
                if entries.is_empty() {
                    channels.remove(channel);
                }
            }
        }

        debug!(channel = %channel, subscription = id, "removed subscriber");
        self.notify_occupancy();
    }

    fn notify_occupancy(&self) {
        let listener = self.occupancy.read().clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

/// Guard for one registration.
///
/// Unsubscribes on [`unsubscribe`](Self::unsubscribe) or on drop, whichever
/// comes first. Unsubscribing more than once is a no-op.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    id: SubscriptionId,
    channel: String,
    router: Weak<EventRouter>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// A subscription that was never registered (e.g. access denied).
    pub(crate) fn inert(channel: impl Into<String>) -> Self {
        Self {
            id: 0,
            channel: channel.into(),
            router: Weak::new(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registration id. Inert subscriptions have id 0.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Channel this subscription listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether events are still delivered to this subscription.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop delivery. Safe to call repeatedly and from any teardown path.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.remove(&self.channel, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}
