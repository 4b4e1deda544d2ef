//! # ratelane-proto
//!
//! Wire types for the Ratelane dashboard's real-time channel.
//!
//! The backend pushes JSON frames of the shape `{"channel": "...", "data": {...}}`
//! over a single WebSocket. This crate owns the envelope ([`InboundFrame`],
//! [`InboundEvent`]), the few messages a client sends ([`ClientMessage`]), the
//! subscription plans ([`Plan`]) and the typed payload for every known channel
//! ([`ChannelEvent`]).
//!
//! The envelope stays untyped (`serde_json::Value`) on purpose: the router in
//! `ratelane-live` only matches channel names, and each feature decodes its own
//! payload through [`LivePayload`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channels;
pub mod error;
pub mod frame;
pub mod plan;

pub use channels::{
    AlertSeverity, AlertTriggered, ApiHealth, ApiStatusUpdate, BreakerState,
    CircuitBreakerStateChange, ChannelEvent, DashboardStats, LivePayload, RequestLogEntry,
    UsageDatapoint,
};
pub use error::ProtoError;
pub use frame::{ClientMessage, InboundEvent, InboundFrame};
pub use plan::Plan;
