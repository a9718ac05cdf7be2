//! In-process broadcast backend

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::message::Message;
use crate::traits::{MessageHandler, MessagingClient, Subscription};

const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Topic-per-broadcast-channel client living inside the process
///
/// Every subscriber sees every message sent after it subscribed. Nothing is
/// retained for late subscribers.
pub struct InMemoryClient {
    topics: Mutex<HashMap<String, broadcast::Sender<Message>>>,
    capacity: usize,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// `capacity` messages are buffered per topic before slow subscribers lag
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Message> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingClient for InMemoryClient {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, topic: &str, message: Message) -> Result<()> {
        if self.sender(topic).send(message).is_err() {
            debug!(topic, "No subscribers for topic, message dropped");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<Subscription> {
        let mut rx = self.sender(topic).subscribe();
        let token = CancellationToken::new();
        let stop = token.clone();
        let topic_name = topic.to_string();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(message) => handler(message),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic_name, skipped, "Subscriber lagged, messages skipped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(topic = %topic_name, "In-memory subscription stopped");
        });

        Ok(Subscription::new(topic, token, handle))
    }
}
