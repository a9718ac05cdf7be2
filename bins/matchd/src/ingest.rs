//! WebSocket front door
//!
//! Each connection is registered as a writable [`TransportHandle`] so the
//! notification pipeline can reach it. Text (or binary) frames carrying
//! `{"username","score","matchRange"}` are decoded and submitted to the engine.

use async_trait::async_trait;
use matchmaking::{ChannelId, ConnectionRegistry, MatchingEngine, TransportError, TransportHandle};
use observability::ServerMetrics;
use serde::Deserialize;
use server::{ConnectionHandle, ConnectionId, MessageHandler, ServerError};
use std::sync::Arc;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Reply sent when the engine refuses a submission
pub const REJECTED_REPLY: &str = r#"{"type":"rejected","reason":"backpressure"}"#;

/// Registry key for a WebSocket connection
pub fn channel_for(conn_id: ConnectionId) -> ChannelId {
    ChannelId::new(format!("ws-{conn_id}"))
}

/// Player request as sent by clients
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerFrame {
    pub username: String,
    pub score: i32,
    pub match_range: i32,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("username is required")]
    MissingUsername,

    #[error("matchRange must not be negative, got {0}")]
    NegativeRange(i32),
}

/// Decode and sanity-check one player frame
pub fn decode_frame(bytes: &[u8]) -> Result<PlayerFrame, FrameError> {
    let frame: PlayerFrame = serde_json::from_slice(bytes)?;
    if frame.username.trim().is_empty() {
        return Err(FrameError::MissingUsername);
    }
    if frame.match_range < 0 {
        return Err(FrameError::NegativeRange(frame.match_range));
    }
    Ok(frame)
}

/// [`TransportHandle`] over a live WebSocket connection
pub struct WsTransport {
    id: ChannelId,
    conn: ConnectionHandle,
}

impl WsTransport {
    pub fn new(conn: ConnectionHandle) -> Self {
        Self {
            id: channel_for(conn.id()),
            conn,
        }
    }
}

#[async_trait]
impl TransportHandle for WsTransport {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn write(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let frame = match String::from_utf8(payload) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };

        self.conn.send(frame).await.map_err(|e| match e {
            ServerError::ConnectionClosed { .. } => TransportError::Closed(self.id.to_string()),
            other => TransportError::WriteFailed(other.to_string()),
        })
    }
}

/// Routes WebSocket traffic into the matching engine
pub struct IngestHandler {
    engine: Arc<MatchingEngine>,
    registry: Arc<ConnectionRegistry>,
    metrics: ServerMetrics,
}

impl IngestHandler {
    pub fn new(engine: Arc<MatchingEngine>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            engine,
            registry,
            metrics: ServerMetrics::new("ingest"),
        }
    }

    /// Submit a decoded frame; returns the reply to send back, if any
    pub fn submit_frame(&self, channel: ChannelId, frame: PlayerFrame) -> Option<Message> {
        let PlayerFrame {
            username,
            score,
            match_range,
        } = frame;

        if self.engine.submit(username, score, match_range, channel) {
            None
        } else {
            Some(Message::Text(REJECTED_REPLY.to_string()))
        }
    }
}

impl MessageHandler for IngestHandler {
    fn handle(&self, conn: &ConnectionHandle, message: Message) -> Option<Message> {
        let decoded = match &message {
            Message::Text(text) => decode_frame(text.as_bytes()),
            Message::Binary(bytes) => decode_frame(bytes),
            _ => return None,
        };

        match decoded {
            Ok(frame) => self.submit_frame(channel_for(conn.id()), frame),
            Err(e) => {
                self.metrics.message_dropped();
                debug!(conn_id = conn.id(), error = %e, "Dropping malformed frame");
                None
            }
        }
    }

    fn on_connect(&self, conn: &ConnectionHandle) {
        let transport = Arc::new(WsTransport::new(conn.clone()));
        if self.registry.register(transport).is_some() {
            warn!(conn_id = conn.id(), "Replaced an existing registration");
        }
    }

    fn on_disconnect(&self, conn_id: ConnectionId) {
        self.registry.unregister(&channel_for(conn_id));
    }
}
