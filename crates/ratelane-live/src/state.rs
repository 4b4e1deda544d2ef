//! Connection state types.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

/// State of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected and not trying to.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Transport open; events flow.
    Connected,
    /// Connection lost or failed; a retry is scheduled or running.
    Reconnecting,
    /// Retry ceiling reached. Stays here until an explicit reconnect.
    Error,
}

impl ConnectionState {
    /// Whether events are flowing.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a disconnection banner should be shown.
    #[must_use]
    pub const fn is_down(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one shared connection state all façades read from.
#[derive(Debug)]
pub struct SharedConnectionState {
    tx: watch::Sender<ConnectionState>,
}

impl SharedConnectionState {
    /// Create a new shared state.
    #[must_use]
    pub fn new(state: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx }
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Store a new state. Returns `true` if it differs from the previous one.
    pub fn store(&self, state: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    /// Watch for state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
