//! Pluggable pub/sub messaging
//!
//! A [`MessagingClient`] publishes [`Message`]s to named topics and delivers
//! them to subscribers. The backend is chosen from configuration:
//!
//! - `memory` - in-process broadcast, nothing leaves the process
//! - `redis_stream` - log-structured, consumer groups with acknowledgement
//! - `redis_pubsub` - push-based, fire and forget

pub mod error;
pub mod memory;
pub mod message;
pub mod redis_pubsub;
pub mod redis_stream;
pub mod traits;

pub use error::{MessagingError, Result};
pub use memory::InMemoryClient;
pub use message::Message;
pub use redis_pubsub::RedisPubSubClient;
pub use redis_stream::RedisStreamClient;
pub use traits::{MessageHandler, MessagingClient, Subscription};

use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Messaging backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingType {
    InMemory,
    RedisStream,
    RedisPubSub,
}

impl FromStr for MessagingType {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in_memory" => Ok(MessagingType::InMemory),
            "redis_stream" | "redis-stream" | "stream" => Ok(MessagingType::RedisStream),
            "redis_pubsub" | "redis-pubsub" | "pubsub" => Ok(MessagingType::RedisPubSub),
            other => Err(MessagingError::UnknownBackend(other.to_string())),
        }
    }
}

/// Create a client for the configured backend
pub async fn create_client(config: &config::MessagingConfig) -> Result<Arc<dyn MessagingClient>> {
    let messaging_type: MessagingType = config.messaging_type.parse()?;
    let redis = config.redis.clone().unwrap_or_default();

    match messaging_type {
        MessagingType::InMemory => {
            info!("Creating in-memory messaging client");
            Ok(Arc::new(InMemoryClient::new()))
        }
        MessagingType::RedisStream => {
            info!("Creating Redis Streams messaging client");
            let client = RedisStreamClient::connect(&redis, config.consumer_group.clone()).await?;
            Ok(Arc::new(client))
        }
        MessagingType::RedisPubSub => {
            info!("Creating Redis Pub/Sub messaging client");
            Ok(Arc::new(RedisPubSubClient::connect(&redis).await?))
        }
    }
}
