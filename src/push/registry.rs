//! Registry of running push streams, for counting and bulk shutdown

use super::stream::PushStream;
use super::writer::PushWriter;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Tracks stream id → cancellation token for every running stream
#[derive(Default)]
pub struct StreamRegistry {
    streams: RwLock<HashMap<String, CancellationToken>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream and run it on its own task.
    ///
    /// The stream is counted from this call until its task finishes.
    pub fn spawn<W>(self: &Arc<Self>, stream: PushStream<W>) -> JoinHandle<Result<()>>
    where
        W: PushWriter + 'static,
    {
        let id = stream.id().to_string();
        let count = {
            let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
            streams.insert(id.clone(), stream.cancellation());
            streams.len()
        };
        tracing::debug!(stream_id = %id, streams = count, "Push stream registered");

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let result = stream.run().await;
            registry.remove(&id);
            result
        })
    }

    fn remove(&self, id: &str) {
        let count = {
            let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
            streams.remove(id);
            streams.len()
        };
        tracing::debug!(stream_id = %id, streams = count, "Push stream unregistered");
    }

    /// Number of running streams
    pub fn count(&self) -> usize {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Ids of running streams
    pub fn ids(&self) -> Vec<String> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Cancel one stream; returns false if the id is unknown
    pub fn stop(&self, id: &str) -> bool {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        match streams.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every stream, returning how many were signalled
    pub fn stop_all(&self) -> usize {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        for token in streams.values() {
            token.cancel();
        }
        tracing::info!(streams = streams.len(), "Stopping all push streams");
        streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Broadcaster;
    use crate::config::StreamConfig;
    use crate::push::writer::{BodyStream, BodyWriter};
    use crate::types::Event;
    use serde_json::Map;
    use std::time::Duration;

    fn new_stream(broadcaster: &Arc<Broadcaster>) -> (PushStream<BodyWriter>, BodyStream) {
        let (writer, body) = BodyWriter::channel(16);
        let stream = PushStream::new(
            writer,
            broadcaster.clone(),
            CancellationToken::new(),
            StreamConfig::default(),
        )
        .unwrap();
        (stream, body)
    }

    #[tokio::test]
    async fn test_count_tracks_lifecycle() {
        let broadcaster = Arc::new(Broadcaster::new());
        let registry = Arc::new(StreamRegistry::new());

        let (stream, _body) = new_stream(&broadcaster);
        let id = stream.id().to_string();
        let handle = registry.spawn(stream);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.ids(), vec![id.clone()]);

        assert!(registry.stop(&id));
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(registry.count(), 0);
        assert!(!registry.stop(&id));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let broadcaster = Arc::new(Broadcaster::new());
        let registry = Arc::new(StreamRegistry::new());

        let mut handles = Vec::new();
        let mut bodies = Vec::new();
        for _ in 0..3 {
            let (stream, body) = new_stream(&broadcaster);
            bodies.push(body);
            handles.push(registry.spawn(stream));
        }
        assert_eq!(registry.count(), 3);

        assert_eq!(registry.stop_all(), 3);
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(registry.count(), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_interrupts_blocked_flush() {
        let broadcaster = Arc::new(Broadcaster::new());
        let registry = Arc::new(StreamRegistry::new());

        // One-chunk body that is never read: the connected frame fills it
        // and the next flush blocks.
        let (writer, _body) = BodyWriter::channel(1);
        let stream = PushStream::new(
            writer,
            broadcaster.clone(),
            CancellationToken::new(),
            StreamConfig::default(),
        )
        .unwrap();
        let id = stream.id().to_string();
        let handle = registry.spawn(stream);

        tokio::time::timeout(Duration::from_secs(2), async {
            while broadcaster.subscriber_count() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        broadcaster.broadcast(Event::new("drift", Map::new()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(registry.stop(&id));
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("stream ignored stop while its flush was blocked")
            .unwrap()
            .unwrap();
        assert_eq!(registry.count(), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_body_removes_stream() {
        let broadcaster = Arc::new(Broadcaster::new());
        let registry = Arc::new(StreamRegistry::new());

        let (stream, body) = new_stream(&broadcaster);
        drop(body);
        let handle = registry.spawn(stream);

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
        assert_eq!(registry.count(), 0);
    }
}
