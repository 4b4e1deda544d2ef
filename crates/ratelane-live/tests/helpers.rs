//! Test helpers: an in-memory push server behind the `Connector` seam.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ratelane_live::{
    ConnectFuture, ConnectionManager, ConnectionState, Connector, EventRouter, LiveConfig, LiveError,
    LiveProvider, ReconnectSettings, TransportFrame, TransportLink,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

/// Generous upper bound; with paused time this only advances the clock.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Server half of one accepted link.
struct ServerLink {
    to_client: mpsc::Sender<TransportFrame>,
    from_client: mpsc::Receiver<String>,
}

#[derive(Default)]
struct ServerState {
    refuse_next: u32,
    refuse_all: bool,
    open_delay: Duration,
    opens: Vec<Instant>,
    links: Vec<ServerLink>,
}

/// In-memory push server.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector handing out links to this server.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            server: self.clone(),
        })
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: u32) {
        self.state.lock().refuse_next = n;
    }

    /// Refuse every attempt until switched back.
    pub fn set_refusing(&self, refusing: bool) {
        self.state.lock().refuse_all = refusing;
    }

    /// Make every connection attempt take `delay` before it resolves.
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = delay;
    }

    /// Number of connection attempts, successful or not.
    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    /// When each attempt happened.
    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().opens.clone()
    }

    /// Number of accepted links.
    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Push a raw text frame on the newest link.
    pub fn push(&self, text: impl Into<String>) {
        let state = self.state.lock();
        let link = state.links.last().expect("no link accepted yet");
        link.to_client
            .try_send(TransportFrame::Text(text.into()))
            .expect("client link buffer full");
    }

    /// Push `{"channel": .., "data": ..}` on the newest link.
    pub fn publish(&self, channel: &str, data: serde_json::Value) {
        self.push(serde_json::json!({ "channel": channel, "data": data }).to_string());
    }

    /// Close the newest link from the server side.
    pub fn drop_link(&self, reason: &str) {
        let state = self.state.lock();
        let link = state.links.last().expect("no link accepted yet");
        let _ = link.to_client.try_send(TransportFrame::Closed {
            reason: reason.to_string(),
        });
    }

    /// Messages the client wrote on the newest link so far.
    pub fn received(&self) -> Vec<String> {
        let mut state = self.state.lock();
        let Some(link) = state.links.last_mut() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Ok(msg) = link.from_client.try_recv() {
            out.push(msg);
        }
        out
    }

    fn open(&self) -> Result<TransportLink, LiveError> {
        let mut state = self.state.lock();
        state.opens.push(Instant::now());

        if state.refuse_all {
            return Err(LiveError::Transport("connection refused".to_string()));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(LiveError::Transport("connection refused".to_string()));
        }

        let (to_client, inbound) = mpsc::channel(256);
        let (outbound, from_client) = mpsc::channel(256);
        state.links.push(ServerLink {
            to_client,
            from_client,
        });

        Ok(TransportLink { outbound, inbound })
    }
}

struct MockConnector {
    server: MockServer,
}

impl Connector for MockConnector {
    fn open(&self) -> ConnectFuture<'_> {
        let delay = self.server.state.lock().open_delay;
        if delay.is_zero() {
            let result = self.server.open();
            return Box::pin(async move { result });
        }
        let server = self.server.clone();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            server.open()
        })
    }

    fn endpoint(&self) -> &str {
        "mock://push"
    }
}

/// Settings with no jitter so delays are exact.
pub fn exact_reconnect(base_ms: u64, max_attempts: u32) -> ReconnectSettings {
    ReconnectSettings {
        base_delay_ms: base_ms,
        max_delay_ms: 30_000,
        multiplier: 2.0,
        jitter: 0.0,
        max_attempts,
        retry_forever: false,
    }
}

/// Config used by most tests: 1s base delay, 5 attempts, no jitter.
pub fn test_config() -> LiveConfig {
    LiveConfig::new("ws://mock/push").with_reconnect(exact_reconnect(1000, 5))
}

pub fn make_provider(server: &MockServer, config: &LiveConfig) -> Arc<LiveProvider> {
    LiveProvider::new(config, server.connector()).expect("valid test config")
}

pub fn make_manager(
    server: &MockServer,
    config: &LiveConfig,
) -> (Arc<ConnectionManager>, Arc<EventRouter>) {
    let router = EventRouter::new();
    let manager = ConnectionManager::with_queue_capacity(
        server.connector(),
        Arc::clone(&router),
        config.reconnect_policy(),
        config.send_queue_capacity,
    );
    (manager, router)
}

/// Wait until the manager reaches `target`.
pub async fn wait_for_state(manager: &ConnectionManager, target: ConnectionState) {
    let mut rx = manager.watch_state();
    timeout(TEST_TIMEOUT, rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target}, still {}", manager.state()))
        .expect("state channel closed");
}

/// Receive the next item or fail the test.
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

/// Let spawned tasks run without advancing the clock.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Assert `actual` is within a few milliseconds of `expected_ms`.
pub fn assert_millis_near(actual: Duration, expected_ms: u64) {
    let actual_ms = actual.as_millis() as i128;
    assert!(
        (actual_ms - i128::from(expected_ms)).abs() <= 5,
        "expected ~{expected_ms}ms, got {actual_ms}ms"
    );
}

/// Gaps between consecutive instants.
pub fn gaps(instants: &[Instant]) -> Vec<Duration> {
    instants.windows(2).map(|w| w[1] - w[0]).collect()
}
