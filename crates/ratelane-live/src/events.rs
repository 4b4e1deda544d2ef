//! Connection lifecycle events.

use std::time::Duration;

/// Events emitted by the connection manager.
///
/// These describe the channel, not its payloads; payloads go through the
/// event router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport opened.
    Connected,
    /// Transport closed.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// A retry is scheduled.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Retry ceiling reached; state is now `error`.
    ReconnectFailed {
        /// Consecutive failures.
        attempts: u32,
        /// Last transport error.
        last_error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_event_disconnected() {
        let event = ConnectionEvent::Disconnected {
            reason: "connection reset".to_string(),
        };
        if let ConnectionEvent::Disconnected { reason } = event {
            assert_eq!(reason, "connection reset");
        } else {
            panic!("expected Disconnected");
        }
    }

    #[test]
    fn test_connection_event_reconnecting() {
        let event = ConnectionEvent::Reconnecting {
            attempt: 3,
            delay: Duration::from_secs(4),
        };
        assert_eq!(
            event,
            ConnectionEvent::Reconnecting {
                attempt: 3,
                delay: Duration::from_secs(4),
            }
        );
    }

    #[test]
    fn test_connection_event_reconnect_failed() {
        let event = ConnectionEvent::ReconnectFailed {
            attempts: 5,
            last_error: "connection refused".to_string(),
        };
        assert!(matches!(
            event,
            ConnectionEvent::ReconnectFailed { attempts: 5, .. }
        ));
    }
}
