//! Push backend on Redis Pub/Sub
//!
//! Messages are wrapped in a JSON envelope so key and headers survive the
//! trip. Nothing is retained: messages published while no subscriber is
//! connected are lost.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MessagingError, Result};
use crate::message::Message;
use crate::traits::{MessageHandler, MessagingClient, Subscription};
use config::RedisConfig;

pub struct RedisPubSubClient {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisPubSubClient {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        info!(host = %config.host, port = config.port, "Connecting to Redis Pub/Sub");

        let client = redis::Client::open(config.url())
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        Ok(Self { client, conn })
    }
}

#[async_trait]
impl MessagingClient for RedisPubSubClient {
    fn backend(&self) -> &'static str {
        "redis_pubsub"
    }

    async fn send(&self, topic: &str, message: Message) -> Result<()> {
        let envelope = message.to_envelope()?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(topic, envelope)
            .await
            .map_err(|e| MessagingError::send(topic, e))?;
        debug!(topic, receivers, "Published message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| MessagingError::subscribe(topic, e))?;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| MessagingError::subscribe(topic, e))?;

        let topic_name = topic.to_string();
        let token = CancellationToken::new();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    next = messages.next() => match next {
                        Some(msg) => match Message::from_envelope(msg.get_payload_bytes()) {
                            Ok(message) => handler(message),
                            Err(e) => warn!(topic = %topic_name, error = %e, "Dropping undecodable pub/sub message"),
                        },
                        None => {
                            warn!(topic = %topic_name, "Pub/sub connection closed");
                            break;
                        }
                    },
                }
            }
            debug!(topic = %topic_name, "Pub/sub subscription stopped");
        });

        Ok(Subscription::new(topic, token, handle))
    }
}
