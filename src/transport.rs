//! HTTP surface: WebSocket upgrade, event stream and stats routes

use crate::broadcaster::Broadcaster;
use crate::config::RealtimeConfig;
use crate::duplex::{serve_socket, DuplexHub};
use crate::error::Result;
use crate::push::{BodyWriter, PushStream, StreamRegistry};
use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handles behind every route
#[derive(Clone)]
pub struct RealtimeState {
    pub broadcaster: Arc<Broadcaster>,
    pub hub: Arc<DuplexHub>,
    pub streams: Arc<StreamRegistry>,
    pub config: RealtimeConfig,
}

impl RealtimeState {
    /// Validate the config and start a hub on the given broadcaster.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(broadcaster: Arc<Broadcaster>, config: RealtimeConfig) -> Result<Self> {
        config.validate()?;
        let hub = DuplexHub::spawn(broadcaster.clone(), config.hub.clone());
        Ok(Self {
            broadcaster,
            hub,
            streams: Arc::new(StreamRegistry::new()),
            config,
        })
    }

    /// Stop the hub and every running push stream
    pub fn shutdown(&self) {
        self.hub.shutdown();
        let stopped = self.streams.stop_all();
        tracing::info!(streams = stopped, "Real-time delivery shut down");
    }
}

/// Mount `/ws`, `/events` and `/stats`
pub fn realtime_router(state: RealtimeState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/events", get(sse_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Upgrade to a WebSocket and hand the socket to the hub.
///
/// Requests that are not valid upgrades are rejected by the extractor, so no
/// client is created for them.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RealtimeState>) -> Response {
    let hub = state.hub.clone();
    ws.max_message_size(state.config.hub.max_message_size)
        .on_upgrade(move |socket| serve_socket(hub, socket))
}

/// Open an unfiltered event stream.
///
/// The stream is cancelled when the response body is dropped.
pub async fn sse_handler(State(state): State<RealtimeState>) -> Response {
    let (writer, body) = BodyWriter::channel(state.config.stream.body_buffer);
    let cancel = CancellationToken::new();

    let stream = match PushStream::new(
        writer,
        state.broadcaster.clone(),
        cancel.clone(),
        state.config.stream.clone(),
    ) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Cannot open push stream");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    state.streams.spawn(stream);

    let guard = cancel.drop_guard();
    let body = body.map(move |chunk| {
        let _ = &guard;
        chunk
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Live receiver counts
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub subscribers: usize,
    pub websocket_clients: usize,
    pub push_streams: usize,
}

pub async fn stats_handler(State(state): State<RealtimeState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        subscribers: state.broadcaster.subscriber_count(),
        websocket_clients: state.hub.client_count(),
        push_streams: state.streams.count(),
    })
}
