//! Per-connection duplex client state and control protocol

use super::protocol::{
    ClientMessage, ServerMessage, MSG_PING, MSG_QUERY, MSG_SUBSCRIBE, MSG_UNSUBSCRIBE,
};
use crate::error::{RealtimeError, Result};
use crate::types::topic_matches;
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// A connected WebSocket client
///
/// The subscription set is written by the client's own reader task and read
/// by the hub during fan-out, so it sits behind its own lock.
#[derive(Debug)]
pub struct DuplexClient {
    id: String,
    subscriptions: RwLock<HashSet<String>>,
}

impl DuplexClient {
    /// Create a client with no subscriptions
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subscriptions: RwLock::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a topic, returning false if it was already present
    pub fn subscribe(&self, topic: &str) -> bool {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string())
    }

    /// Remove a topic, returning false if it was not present
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic)
    }

    /// Current topics, sorted
    pub fn subscriptions(&self) -> Vec<String> {
        let subs = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut topics: Vec<String> = subs.iter().cloned().collect();
        topics.sort();
        topics
    }

    /// Whether an event of this type should reach the client
    pub fn wants(&self, event_type: &str) -> bool {
        let subs = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        subs.iter().any(|topic| topic_matches(topic, event_type))
    }

    /// Apply one inbound text frame and produce the reply.
    ///
    /// Protocol errors are answered with an error frame; they never end the
    /// connection.
    pub fn handle_control(&self, text: &str) -> ServerMessage {
        match self.apply_control(text) {
            Ok(reply) => reply,
            Err(RealtimeError::Protocol(reason)) => {
                tracing::debug!(client_id = %self.id, reason = %reason, "Rejected control frame");
                ServerMessage::error(reason)
            }
            Err(e) => ServerMessage::error(e.to_string()),
        }
    }

    fn apply_control(&self, text: &str) -> Result<ServerMessage> {
        let msg: ClientMessage = serde_json::from_str(text)
            .map_err(|_| RealtimeError::Protocol("Invalid message format".to_string()))?;

        match msg.kind.as_str() {
            MSG_SUBSCRIBE => {
                let topic = required_topic(&msg)?;
                self.subscribe(topic);
                tracing::info!(client_id = %self.id, topic = %topic, "Client subscribed");
                Ok(ServerMessage::subscribed(topic))
            }
            MSG_UNSUBSCRIBE => {
                let topic = required_topic(&msg)?;
                self.unsubscribe(topic);
                tracing::info!(client_id = %self.id, topic = %topic, "Client unsubscribed");
                Ok(ServerMessage::unsubscribed(topic))
            }
            MSG_PING => Ok(ServerMessage::pong()),
            // Queries are part of the protocol but have no backing store here.
            MSG_QUERY => Err(RealtimeError::Protocol(
                "Query not implemented yet".to_string(),
            )),
            other => Err(RealtimeError::Protocol(format!(
                "Unknown message type: {}",
                other
            ))),
        }
    }
}

fn required_topic(msg: &ClientMessage) -> Result<&str> {
    if msg.topic.is_empty() {
        return Err(RealtimeError::Protocol("Topic is required".to_string()));
    }
    Ok(&msg.topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(client: &DuplexClient, text: &str) -> ServerMessage {
        client.handle_control(text)
    }

    #[test]
    fn test_new_client_has_no_subscriptions() {
        let client = DuplexClient::new("c-1");
        assert_eq!(client.id(), "c-1");
        assert!(client.subscriptions().is_empty());
        assert!(!client.wants("drift"));
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let client = DuplexClient::new("c-1");

        let msg = reply(&client, r#"{"type":"subscribe","topic":"drift"}"#);
        assert_eq!(msg.kind, "subscribed");
        assert_eq!(msg.topic.as_deref(), Some("drift"));
        assert!(client.wants("drift"));
        assert!(!client.wants("falco"));

        let msg = reply(&client, r#"{"type":"unsubscribe","topic":"drift"}"#);
        assert_eq!(msg.kind, "unsubscribed");
        assert!(!client.wants("drift"));
    }

    #[test]
    fn test_all_matches_every_type() {
        let client = DuplexClient::new("c-1");
        client.subscribe("all");
        assert!(client.wants("drift"));
        assert!(client.wants("falco"));
        assert!(client.wants("producer_defined"));
    }

    #[test]
    fn test_exact_topics_match_only_themselves() {
        let client = DuplexClient::new("c-1");
        client.subscribe("drift");
        client.subscribe("state_change");
        assert!(client.wants("drift"));
        assert!(client.wants("state_change"));
        assert!(!client.wants("falco"));
        assert!(!client.wants("all"));
    }

    #[test]
    fn test_repeat_subscribe_is_idempotent() {
        let client = DuplexClient::new("c-1");
        assert!(client.subscribe("drift"));
        assert!(!client.subscribe("drift"));
        assert_eq!(client.subscriptions(), vec!["drift"]);
        assert!(client.unsubscribe("drift"));
        assert!(!client.unsubscribe("drift"));
    }

    #[test]
    fn test_ping_replies_pong() {
        let client = DuplexClient::new("c-1");
        assert_eq!(reply(&client, r#"{"type":"ping"}"#).kind, "pong");
    }

    #[test]
    fn test_query_is_stubbed() {
        let client = DuplexClient::new("c-1");
        let msg = reply(&client, r#"{"type":"query","payload":{"resource_id":"i-1"}}"#);
        assert_eq!(msg.kind, "error");
        assert_eq!(msg.error.as_deref(), Some("Query not implemented yet"));
    }

    #[test]
    fn test_unknown_type() {
        let client = DuplexClient::new("c-1");
        let msg = reply(&client, r#"{"type":"explode"}"#);
        assert_eq!(msg.kind, "error");
        assert_eq!(msg.error.as_deref(), Some("Unknown message type: explode"));
    }

    #[test]
    fn test_malformed_json() {
        let client = DuplexClient::new("c-1");
        for text in ["not json", "{", r#"{"topic":"drift"}"#, "[]"] {
            let msg = reply(&client, text);
            assert_eq!(msg.kind, "error");
            assert_eq!(msg.error.as_deref(), Some("Invalid message format"));
        }
    }

    #[test]
    fn test_subscribe_without_topic() {
        let client = DuplexClient::new("c-1");
        let msg = reply(&client, r#"{"type":"subscribe"}"#);
        assert_eq!(msg.error.as_deref(), Some("Topic is required"));
        assert!(client.subscriptions().is_empty());
    }
}
