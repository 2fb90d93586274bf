//! Reader and writer loops for one WebSocket connection

use super::client::DuplexClient;
use super::hub::DuplexHub;
use super::protocol::ServerMessage;
use crate::config::HubConfig;
use crate::error::{RealtimeError, Result};
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// Upper bound on frames coalesced into one flush
const MAX_BATCH: usize = 64;

/// Drive one accepted WebSocket until either side fails.
///
/// Registers a new client with the hub, writes the welcome frame straight to
/// the socket, then runs the reader and writer concurrently. Whichever ends
/// first triggers unregistration.
pub async fn serve_socket<S, E>(hub: Arc<DuplexHub>, socket: S)
where
    S: Stream<Item = std::result::Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
    E: Display + Send + 'static,
{
    let client = Arc::new(DuplexClient::new(uuid::Uuid::new_v4().to_string()));
    let client_id = client.id().to_string();
    let config = hub.config().clone();

    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(config.client_buffer.max(1));
    let replies = outbound_tx.downgrade();
    hub.register(client.clone(), outbound_tx);

    let (mut sink, stream) = socket.split();

    if let Err(e) = send_welcome(&mut sink, &client_id, config.write_wait()).await {
        tracing::warn!(client_id = %client_id, error = %e, "Failed to send welcome frame");
        hub.unregister(&client_id);
        return;
    }
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    let mut writer = tokio::spawn(write_loop(sink, outbound_rx, config.clone(), client_id.clone()));
    let mut reader = tokio::spawn(read_loop(stream, client, replies, config.pong_wait()));

    tokio::select! {
        _ = &mut reader => {
            hub.unregister(&client_id);
            // The writer ends once the hub closes the outbound queue.
            let _ = writer.await;
        }
        _ = &mut writer => {
            reader.abort();
            hub.unregister(&client_id);
        }
    }

    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
}

async fn send_welcome<Si, E>(sink: &mut Si, client_id: &str, write_wait: Duration) -> Result<()>
where
    Si: Sink<Message, Error = E> + Unpin,
    E: Display,
{
    let welcome = ServerMessage::welcome(client_id).to_json()?;
    with_deadline(write_wait, sink.send(Message::Text(welcome))).await
}

/// Reads control frames until the connection fails or the pong deadline passes
async fn read_loop<St, E>(
    mut stream: St,
    client: Arc<DuplexClient>,
    replies: mpsc::WeakSender<String>,
    pong_wait: Duration,
) where
    St: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let message = match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                tracing::warn!(client_id = %client.id(), "Pong deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(client_id = %client.id(), error = %e, "WebSocket read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Pong(_) => {
                deadline = Instant::now() + pong_wait;
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(_) => break,
        };

        let reply = client.handle_control(&text);
        if !send_reply(&replies, reply).await {
            break;
        }
    }
}

/// Queue a reply behind any pending event frames. Returns false once the hub
/// has closed the queue.
async fn send_reply(replies: &mpsc::WeakSender<String>, reply: ServerMessage) -> bool {
    let Some(outbound) = replies.upgrade() else {
        return false;
    };
    match reply.to_json() {
        Ok(frame) => outbound.send(frame).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode reply, dropped");
            true
        }
    }
}

/// Writes queued frames and periodic pings until a write fails or the hub
/// closes the queue
async fn write_loop<Si, E>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<String>,
    config: HubConfig,
    client_id: String,
) where
    Si: Sink<Message, Error = E> + Unpin,
    E: Display,
{
    let write_wait = config.write_wait();
    let ping_period = config.ping_period();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = with_deadline(write_wait, sink.send(Message::Close(None))).await;
                    break;
                };
                if let Err(e) = with_deadline(write_wait, write_batch(&mut sink, &mut outbound, frame)).await {
                    tracing::debug!(client_id = %client_id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = with_deadline(write_wait, sink.send(Message::Ping(Vec::new()))).await {
                    tracing::debug!(client_id = %client_id, error = %e, "WebSocket ping failed");
                    break;
                }
            }
        }
    }
}

/// Write one frame plus whatever is already queued, then flush once
async fn write_batch<Si, E>(
    sink: &mut Si,
    outbound: &mut mpsc::Receiver<String>,
    first: String,
) -> std::result::Result<(), E>
where
    Si: Sink<Message, Error = E> + Unpin,
{
    sink.feed(Message::Text(first)).await?;
    for _ in 1..MAX_BATCH {
        match outbound.try_recv() {
            Ok(frame) => sink.feed(Message::Text(frame)).await?,
            Err(_) => break,
        }
    }
    sink.flush().await
}

async fn with_deadline<F, E>(deadline: Duration, write: F) -> Result<()>
where
    F: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(deadline, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RealtimeError::Connection(e.to_string())),
        Err(_) => Err(RealtimeError::Connection(format!(
            "write deadline of {:?} exceeded",
            deadline
        ))),
    }
}
