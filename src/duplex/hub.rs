//! Actor owning the set of live WebSocket clients
//!
//! The client map lives inside the hub's control loop and nowhere else.
//! Connections register and unregister by sending commands; events arrive
//! from a single broadcaster subscription (or the hub's own direct channel)
//! and are fanned out to every client whose subscriptions match.

use super::client::DuplexClient;
use super::protocol::ServerMessage;
use crate::broadcaster::{Broadcaster, EventReceiver, SubscriptionId};
use crate::config::HubConfig;
use crate::types::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Sending half of a client's outbound frame queue
pub type OutboundSender = mpsc::Sender<String>;

enum HubCommand {
    Register {
        client: Arc<DuplexClient>,
        outbound: OutboundSender,
    },
    Unregister {
        client_id: String,
    },
}

struct ClientEntry {
    client: Arc<DuplexClient>,
    /// The only strong sender for this queue; dropping it closes the queue.
    outbound: OutboundSender,
}

/// Handle to the running hub
///
/// Cheap to share as `Arc<DuplexHub>`; dropping the last handle stops the
/// control loop.
pub struct DuplexHub {
    commands: mpsc::UnboundedSender<HubCommand>,
    direct: mpsc::Sender<Arc<Event>>,
    client_count: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    config: HubConfig,
}

impl DuplexHub {
    /// Subscribe to the broadcaster and spawn the control loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(broadcaster: Arc<Broadcaster>, config: HubConfig) -> Arc<Self> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (direct_tx, direct_rx) = mpsc::channel(config.event_buffer.max(1));
        let (subscription, events) = broadcaster.subscribe_channel(config.event_buffer);
        let client_count = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let control = HubLoop {
            clients: HashMap::new(),
            commands: commands_rx,
            direct: direct_rx,
            events,
            broadcaster,
            subscription,
            client_count: client_count.clone(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(control.run());

        Arc::new(Self {
            commands: commands_tx,
            direct: direct_tx,
            client_count,
            shutdown,
            config,
        })
    }

    /// Ask the hub to start delivering to a client.
    ///
    /// The hub becomes the sole owner of `outbound`; the queue closes when the
    /// client is unregistered.
    pub fn register(&self, client: Arc<DuplexClient>, outbound: OutboundSender) {
        let client_id = client.id().to_string();
        if self
            .commands
            .send(HubCommand::Register { client, outbound })
            .is_err()
        {
            tracing::debug!(client_id = %client_id, "Hub stopped, registration ignored");
        }
    }

    /// Ask the hub to drop a client; unknown ids are ignored
    pub fn unregister(&self, client_id: &str) {
        let command = HubCommand::Unregister {
            client_id: client_id.to_string(),
        };
        if self.commands.send(command).is_err() {
            tracing::debug!(client_id = %client_id, "Hub stopped, unregistration ignored");
        }
    }

    /// Deliver an event to WebSocket clients only, bypassing the broadcaster.
    ///
    /// Returns false if the hub's queue is full or the hub has stopped.
    pub fn publish_direct(&self, event: Event) -> bool {
        match self.direct.try_send(Arc::new(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Direct hub publish dropped");
                false
            }
        }
    }

    /// Number of registered clients
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Acquire)
    }

    /// Stop the control loop, unsubscribe from the broadcaster and close
    /// every client queue
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }
}

impl Drop for DuplexHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct HubLoop {
    clients: HashMap<String, ClientEntry>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
    direct: mpsc::Receiver<Arc<Event>>,
    events: EventReceiver,
    broadcaster: Arc<Broadcaster>,
    subscription: SubscriptionId,
    client_count: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl HubLoop {
    async fn run(mut self) {
        tracing::info!(subscription = self.subscription, "Duplex hub started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,
                Some(command) = self.commands.recv() => self.handle_command(command),
                Some(event) = self.direct.recv() => self.fan_out(&event),
                Some(event) = self.events.recv() => self.fan_out(&event),
                else => break,
            }
        }

        self.broadcaster.unsubscribe(self.subscription);
        self.client_count.store(0, Ordering::Release);
        let closed = std::mem::take(&mut self.clients);

        tracing::info!(closed_clients = closed.len(), "Duplex hub stopped");
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { client, outbound } => {
                let client_id = client.id().to_string();
                if self
                    .clients
                    .insert(client_id.clone(), ClientEntry { client, outbound })
                    .is_some()
                {
                    tracing::warn!(client_id = %client_id, "Client id registered twice, replaced");
                }
                tracing::info!(
                    client_id = %client_id,
                    clients = self.clients.len(),
                    "Client registered"
                );
                self.client_count.store(self.clients.len(), Ordering::Release);
            }
            HubCommand::Unregister { client_id } => {
                let removed = self.clients.remove(&client_id);
                self.client_count.store(self.clients.len(), Ordering::Release);
                match removed {
                    Some(entry) => {
                        // Closes the outbound queue; the writer sends a close frame.
                        drop(entry);
                        tracing::info!(
                            client_id = %client_id,
                            clients = self.clients.len(),
                            "Client unregistered"
                        );
                    }
                    None => {
                        tracing::debug!(client_id = %client_id, "Unregister of absent client ignored");
                    }
                }
            }
        }
    }

    fn fan_out(&self, event: &Event) {
        if self.clients.is_empty() {
            return;
        }

        let frame = match ServerMessage::event(event).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to encode event for WebSocket clients, dropped"
                );
                return;
            }
        };

        for (client_id, entry) in &self.clients {
            if !entry.client.wants(&event.event_type) {
                continue;
            }
            match entry.outbound.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        client_id = %client_id,
                        event_type = %event.event_type,
                        "Client outbound queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(client_id = %client_id, "Client writer gone, awaiting unregister");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};
    use std::time::Duration;

    fn event(event_type: &str, resource_id: &str) -> Event {
        Event::new(event_type, Map::new()).with_field("resource_id", resource_id)
    }

    async fn wait_for_clients(hub: &DuplexHub, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.client_count() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client count never reached expected value");
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    fn connect(hub: &DuplexHub, id: &str, capacity: usize) -> (Arc<DuplexClient>, mpsc::Receiver<String>) {
        let client = Arc::new(DuplexClient::new(id));
        let (tx, rx) = mpsc::channel(capacity);
        hub.register(client.clone(), tx);
        (client, rx)
    }

    #[tokio::test]
    async fn test_hub_subscribes_once_to_broadcaster() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hub = DuplexHub::spawn(broadcaster.clone(), HubConfig::default());
        assert_eq!(broadcaster.subscriber_count(), 1);

        let (_a, _rx_a) = connect(&hub, "a", 8);
        let (_b, _rx_b) = connect(&hub, "b", 8);
        wait_for_clients(&hub, 2).await;
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_topic_filtering() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hub = DuplexHub::spawn(broadcaster.clone(), HubConfig::default());

        let (drift_only, mut drift_rx) = connect(&hub, "drift-only", 8);
        drift_only.subscribe("drift");
        let (everything, mut all_rx) = connect(&hub, "everything", 8);
        everything.subscribe("all");
        wait_for_clients(&hub, 2).await;

        broadcaster.broadcast(event("falco", "i-1"));
        broadcaster.broadcast(event("drift", "i-2"));

        let first = next_frame(&mut drift_rx).await;
        assert_eq!(first["type"], "drift");
        assert_eq!(first["data"]["resource_id"], "i-2");

        assert_eq!(next_frame(&mut all_rx).await["type"], "falco");
        assert_eq!(next_frame(&mut all_rx).await["type"], "drift");
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_not_delivered() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hub = DuplexHub::spawn(broadcaster.clone(), HubConfig::default());

        let (client, mut rx) = connect(&hub, "c", 8);
        client.subscribe("drift");
        client.subscribe("state_change");
        wait_for_clients(&hub, 1).await;

        client.unsubscribe("drift");
        broadcaster.broadcast(event("drift", "i-1"));
        broadcaster.broadcast(event("state_change", "i-2"));

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "state_change");
        assert_eq!(frame["data"]["resource_id"], "i-2");
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_and_is_idempotent() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hub = DuplexHub::spawn(broadcaster, HubConfig::default());

        let (_client, mut rx) = connect(&hub, "c", 8);
        wait_for_clients(&hub, 1).await;

        hub.unregister("c");
        hub.unregister("c");
        hub.unregister("never-registered");
        wait_for_clients(&hub, 0).await;

        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_disconnect() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hub = DuplexHub::spawn(broadcaster.clone(), HubConfig::default());

        let (client, mut rx) = connect(&hub, "slow", 1);
        client.subscribe("all");
        wait_for_clients(&hub, 1).await;

        for i in 0..3 {
            broadcaster.broadcast(event("drift", &format!("i-{}", i)));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(next_frame(&mut rx).await["data"]["resource_id"], "i-0");
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.client_count(), 1);

        broadcaster.broadcast(event("drift", "i-9"));
        assert_eq!(next_frame(&mut rx).await["data"]["resource_id"], "i-9");
    }

    #[tokio::test]
    async fn test_publish_direct_reaches_clients_only() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hub = DuplexHub::spawn(broadcaster.clone(), HubConfig::default());
        let (_other, mut other_rx) = broadcaster.subscribe_channel(4);

        let (client, mut rx) = connect(&hub, "c", 8);
        client.subscribe("all");
        wait_for_clients(&hub, 1).await;

        assert!(hub.publish_direct(event("notice", "hub-only")));
        assert_eq!(next_frame(&mut rx).await["data"]["resource_id"], "hub-only");
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hub = DuplexHub::spawn(broadcaster.clone(), HubConfig::default());

        let (_client, mut rx) = connect(&hub, "c", 8);
        wait_for_clients(&hub, 1).await;

        hub.shutdown();
        assert!(hub.is_shutdown());

        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert_eq!(hub.client_count(), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
