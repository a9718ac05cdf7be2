//! Messaging client capability

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::Message;

/// Callback invoked for every message received on a subscription
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Publish/subscribe client over some broker
///
/// Delivery guarantees depend on the backend: log-structured backends
/// redeliver unacknowledged messages, push backends drop messages published
/// while nobody listens.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    async fn send(&self, topic: &str, message: Message) -> Result<()>;

    /// Start delivering messages on `topic` to `handler` until the returned
    /// subscription is cancelled or dropped
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<Subscription>;
}

/// Live subscription; the listener stops when this is dropped
pub struct Subscription {
    topic: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            topic: topic.into(),
            token,
            handle: Some(handle),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the listener and wait for it to exit
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
