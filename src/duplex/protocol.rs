//! WebSocket wire protocol
//!
//! Inbound control frames are `{type, topic, payload}`; outbound frames are
//! `{type, topic?, data?, timestamp, error?}` with RFC3339 timestamps.

use crate::error::Result;
use crate::types::{now_rfc3339, Event, VALID_TOPICS};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MSG_SUBSCRIBE: &str = "subscribe";
pub const MSG_UNSUBSCRIBE: &str = "unsubscribe";
pub const MSG_PING: &str = "ping";
pub const MSG_QUERY: &str = "query";

pub const MSG_WELCOME: &str = "welcome";
pub const MSG_SUBSCRIBED: &str = "subscribed";
pub const MSG_UNSUBSCRIBED: &str = "unsubscribed";
pub const MSG_PONG: &str = "pong";
pub const MSG_ERROR: &str = "error";

/// Control frame sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub topic: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Frame sent to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default)]
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerMessage {
    fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            topic: None,
            data: None,
            timestamp: now_rfc3339(),
            error: None,
        }
    }

    /// Greeting written directly to a fresh connection
    pub fn welcome(client_id: &str) -> Self {
        let mut msg = Self::new(MSG_WELCOME);
        msg.data = Some(serde_json::json!({
            "client_id": client_id,
            "message": "Connected to drift event stream",
            "topics": VALID_TOPICS,
        }));
        msg
    }

    pub fn subscribed(topic: &str) -> Self {
        let mut msg = Self::new(MSG_SUBSCRIBED);
        msg.topic = Some(topic.to_string());
        msg
    }

    pub fn unsubscribed(topic: &str) -> Self {
        let mut msg = Self::new(MSG_UNSUBSCRIBED);
        msg.topic = Some(topic.to_string());
        msg
    }

    pub fn pong() -> Self {
        Self::new(MSG_PONG)
    }

    pub fn error(reason: impl Into<String>) -> Self {
        let mut msg = Self::new(MSG_ERROR);
        msg.error = Some(reason.into());
        msg
    }

    /// Event frame; the event type doubles as frame type and topic
    pub fn event(event: &Event) -> Self {
        let timestamp = if event.timestamp.is_empty() {
            now_rfc3339()
        } else {
            event.timestamp.clone()
        };
        Self {
            kind: event.event_type.clone(),
            topic: Some(event.event_type.clone()),
            data: Some(Value::Object(event.payload.clone())),
            timestamp,
            error: None,
        }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
