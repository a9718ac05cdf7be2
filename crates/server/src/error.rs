//! Front door errors

use std::io;
use thiserror::Error;

#[allow(clippy::result_large_err)]
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Cannot listen on {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid listener configuration: {0}")]
    ConfigError(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer is gone; nothing more can be written to it
    #[error("Connection {id} closed")]
    ConnectionClosed { id: u64 },

    #[error("Write to connection {id} failed: {reason}")]
    SendFailed { id: u64, reason: String },

    #[error("Listener task panicked: {0}")]
    ListenerPanicked(String),
}

impl ServerError {
    pub fn bind(address: impl Into<String>, source: io::Error) -> Self {
        Self::BindError {
            address: address.into(),
            source,
        }
    }

    pub fn send_failed(id: u64, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            id,
            reason: reason.into(),
        }
    }
}
