//! # a3s-realtime
//!
//! Real-time fan-out of drift and security events to WebSocket and
//! Server-Sent Events clients for the A3S ecosystem.
//!
//! ## Overview
//!
//! Producers publish to one process-wide [`Broadcaster`]. Two transports sit
//! on top of it:
//!
//! - **duplex** — a WebSocket [`DuplexHub`] with per-client topic
//!   subscriptions and a small JSON control protocol
//! - **push** — an unfiltered [`PushStream`] per HTTP client, framed as
//!   `event: <type>\ndata: <json>\n\n`
//!
//! Delivery is at-most-once and best-effort: every receiver has a bounded
//! queue, and a full queue loses the event for that receiver only.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_realtime::{realtime_router, Broadcaster, DriftAlert, RealtimeConfig, RealtimeState};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_realtime::Result<()> {
//! let broadcaster = Arc::new(Broadcaster::new());
//! let state = RealtimeState::new(broadcaster.clone(), RealtimeConfig::default())?;
//! let app = realtime_router(state);
//!
//! // Serve `app` with axum, then publish from anywhere:
//! broadcaster.broadcast_drift_alert(&DriftAlert {
//!     resource_type: "aws_instance".to_string(),
//!     resource_id: "i-123".to_string(),
//!     ..Default::default()
//! });
//! # let _ = app;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Broadcaster** — transport-agnostic registry of bounded channels
//! - **DuplexHub** — actor owning the live WebSocket client set
//! - **PushStream** / **StreamRegistry** — per-connection SSE pumps
//! - **transport** — axum routes wiring both transports to HTTP

pub mod broadcaster;
pub mod config;
pub mod duplex;
pub mod error;
pub mod push;
pub mod transport;
pub mod types;

// Re-export core types
pub use broadcaster::{Broadcaster, EventReceiver, EventSender, SubscriptionId};
pub use config::{HubConfig, RealtimeConfig, StreamConfig};
pub use duplex::{serve_socket, ClientMessage, DuplexClient, DuplexHub, ServerMessage};
pub use error::{RealtimeError, Result};
pub use push::{BodyWriter, PushStream, PushWriter, StreamRegistry};
pub use transport::{realtime_router, RealtimeState};
pub use types::{
    topic_matches, CloudEvent, DriftAlert, Event, UserIdentity, TOPIC_ALL, TOPIC_DRIFT,
    TOPIC_FALCO, TOPIC_STATE_CHANGE,
};
