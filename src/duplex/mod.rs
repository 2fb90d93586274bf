//! Bidirectional WebSocket delivery with per-client topic subscriptions
//!
//! - `DuplexHub` — actor owning the live client set, fed by one broadcaster
//!   subscription
//! - `DuplexClient` — per-connection subscription state and control protocol
//! - `serve_socket` — reader/writer loops for one upgraded connection

mod client;
mod connection;
mod hub;
pub mod protocol;

pub use client::DuplexClient;
pub use connection::serve_socket;
pub use hub::{DuplexHub, OutboundSender};
pub use protocol::{ClientMessage, ServerMessage};
