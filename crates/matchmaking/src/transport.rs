//! Writable connection handles
//!
//! The core never touches sockets. Front doors hand it a [`TransportHandle`]
//! per live connection and the notification pipeline writes match outcomes
//! through it.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::request::ChannelId;

/// A live connection that can receive bytes
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Identifier the connection was registered under
    fn id(&self) -> &ChannelId;

    /// Write one payload; resolves once the write has completed or failed
    async fn write(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Shared handle as stored in the registry
pub type SharedHandle = Arc<dyn TransportHandle>;

/// In-process handle backed by an unbounded channel
///
/// Useful for embedding the engine without a network front door.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelHandle {
    pub fn new(id: impl Into<ChannelId>) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id: id.into(), tx }, rx)
    }
}

#[async_trait]
impl TransportHandle for ChannelHandle {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn write(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(payload)
            .map_err(|_| TransportError::Closed(self.id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_handle_delivers() {
        let (handle, mut rx) = ChannelHandle::new("c1");
        tokio_test::assert_ok!(handle.write(b"hello".to_vec()).await);
        assert_eq!(rx.recv().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_channel_handle_closed() {
        let (handle, rx) = ChannelHandle::new("c1");
        drop(rx);
        let err = handle.write(vec![1]).await.unwrap_err();
        assert_eq!(err, TransportError::Closed("c1".to_string()));
    }
}
