//! Unfiltered server-push stream for one connection

use super::writer::{comment_frame, event_frame, PushWriter};
use crate::broadcaster::{Broadcaster, EventReceiver};
use crate::config::StreamConfig;
use crate::error::{RealtimeError, Result};
use crate::types::now_rfc3339;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Forwards every broadcast event to one client
///
/// Lifecycle: created (writer capability checked) → started (subscribed,
/// `connected` frame written) → running → stopped (unsubscribed). The stream
/// stops when its cancellation token fires, when a write fails, or when the
/// broadcaster closes its channel.
pub struct PushStream<W> {
    id: String,
    writer: W,
    broadcaster: Arc<Broadcaster>,
    cancel: CancellationToken,
    config: StreamConfig,
}

impl<W: PushWriter> PushStream<W> {
    /// Create a stream, failing fast if the writer cannot flush per frame
    pub fn new(
        writer: W,
        broadcaster: Arc<Broadcaster>,
        cancel: CancellationToken,
        config: StreamConfig,
    ) -> Result<Self> {
        if !writer.supports_flush() {
            return Err(RealtimeError::TransportCapability(
                "response writer does not support streaming flush".to_string(),
            ));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            writer,
            broadcaster,
            cancel,
            config,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token that stops this stream when cancelled
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled or the connection fails.
    ///
    /// The broadcaster subscription is released exactly once on every exit
    /// path.
    pub async fn run(mut self) -> Result<()> {
        let (subscription, mut events) =
            self.broadcaster.subscribe_channel(self.config.event_buffer);
        tracing::info!(stream_id = %self.id, "Push stream started");

        let result = self.pump(&mut events).await;
        self.broadcaster.unsubscribe(subscription);

        match &result {
            Ok(()) => tracing::info!(stream_id = %self.id, "Push stream stopped"),
            Err(e) => tracing::info!(stream_id = %self.id, error = %e, "Push stream closed"),
        }
        result
    }

    async fn pump(&mut self, events: &mut EventReceiver) -> Result<()> {
        let connected = serde_json::json!({
            "stream_id": self.id,
            "message": "Connected to drift event stream",
            "timestamp": now_rfc3339(),
        });
        self.send(&event_frame("connected", &connected.to_string()))
            .await?;

        let period = self.config.heartbeat();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),
                event = events.recv() => {
                    let Some(event) = event else {
                        return Ok(());
                    };
                    let data = match serde_json::to_string(&event.payload) {
                        Ok(data) => data,
                        Err(e) => {
                            tracing::warn!(
                                stream_id = %self.id,
                                event_type = %event.event_type,
                                error = %e,
                                "Failed to encode event for push stream, dropped"
                            );
                            continue;
                        }
                    };
                    self.send(&event_frame(&event.event_type, &data)).await?;
                }
                _ = heartbeat.tick() => {
                    self.send(&comment_frame("heartbeat")).await?;
                }
            }
        }
    }

    /// Write and flush one frame, giving way to cancellation while blocked
    /// on a peer that stopped reading
    async fn send(&mut self, frame: &str) -> Result<()> {
        let writer = &mut self.writer;
        let cancel = &self.cancel;

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!(stream_id = %self.id, "Pending write abandoned on cancel");
                Ok(())
            }
            result = async {
                writer.write(frame).await?;
                writer.flush().await
            } => result,
        }
    }
}
