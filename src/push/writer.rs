//! Push-stream framing and the writers frames are flushed through

use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Destination of a push stream
///
/// Push transports are commonly buffered by proxies, so a stream only runs
/// on writers that can flush each frame on its own.
#[async_trait]
pub trait PushWriter: Send {
    /// Whether `flush` pushes bytes to the peer immediately
    fn supports_flush(&self) -> bool;

    /// Append a frame to the pending output
    async fn write(&mut self, frame: &str) -> Result<()>;

    /// Push pending output to the peer
    async fn flush(&mut self) -> Result<()>;
}

/// Stream of body chunks handed to the HTTP layer
pub type BodyStream = ReceiverStream<std::result::Result<Bytes, Infallible>>;

/// `PushWriter` backed by a streaming HTTP response body.
///
/// Every flush becomes one body chunk. When the client goes away the body
/// is dropped and the next flush fails with a connection error.
pub struct BodyWriter {
    pending: BytesMut,
    body: mpsc::Sender<std::result::Result<Bytes, Infallible>>,
}

impl BodyWriter {
    /// Create a writer and the body stream it feeds
    pub fn channel(capacity: usize) -> (Self, BodyStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = Self {
            pending: BytesMut::new(),
            body: tx,
        };
        (writer, ReceiverStream::new(rx))
    }
}

#[async_trait]
impl PushWriter for BodyWriter {
    fn supports_flush(&self) -> bool {
        true
    }

    async fn write(&mut self, frame: &str) -> Result<()> {
        if self.body.is_closed() {
            return Err(RealtimeError::Connection("response body closed".to_string()));
        }
        self.pending.extend_from_slice(frame.as_bytes());
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        self.body
            .send(Ok(chunk))
            .await
            .map_err(|_| RealtimeError::Connection("response body closed".to_string()))
    }
}

/// `event: <type>\ndata: <json>\n\n`
pub fn event_frame(event_type: &str, data: &str) -> String {
    format!("event: {}\ndata: {}\n\n", single_line(event_type), data)
}

/// `: <comment>\n\n`
pub fn comment_frame(comment: &str) -> String {
    format!(": {}\n\n", single_line(comment))
}

// A line break inside a field would end the frame early.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
