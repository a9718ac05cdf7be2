//! Log-structured backend on Redis Streams
//!
//! `send` appends with `XADD`. Subscribers join a consumer group, read with
//! `XREADGROUP` and acknowledge each entry after the handler returned, so
//! entries read by a consumer that died stay pending for redelivery.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MessagingError, Result};
use crate::message::Message;
use crate::traits::{MessageHandler, MessagingClient, Subscription};
use config::RedisConfig;

const FIELD_PAYLOAD: &str = "payload";
const FIELD_KEY: &str = "key";
const FIELD_HEADERS: &str = "headers";

const READ_BLOCK_MS: usize = 1_000;
const READ_BATCH: usize = 64;
const RETRY_DELAY: Duration = Duration::from_secs(1);

static CONSUMER_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct RedisStreamClient {
    client: redis::Client,
    conn: ConnectionManager,
    group: String,
}

impl RedisStreamClient {
    pub async fn connect(config: &RedisConfig, group: impl Into<String>) -> Result<Self> {
        info!(host = %config.host, port = config.port, db = config.db_index, "Connecting to Redis Streams");

        let client = redis::Client::open(config.url())
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            conn,
            group: group.into(),
        })
    }

    async fn ensure_group(&self, topic: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(topic, &self.group, "$").await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(MessagingError::subscribe(topic, e)),
        }
    }
}

/// Stream entry fields for `message`
pub fn to_fields(message: &Message) -> Result<Vec<(&'static str, Vec<u8>)>> {
    let mut fields = vec![(FIELD_PAYLOAD, message.payload.clone())];
    if let Some(key) = &message.key {
        fields.push((FIELD_KEY, key.clone().into_bytes()));
    }
    if !message.headers.is_empty() {
        fields.push((FIELD_HEADERS, serde_json::to_vec(&message.headers)?));
    }
    Ok(fields)
}

/// Rebuild a message from stream entry fields
pub fn from_fields(map: &HashMap<String, Value>) -> Result<Message> {
    let bytes = |name: &str| -> Result<Option<Vec<u8>>> {
        map.get(name)
            .map(|v| redis::from_redis_value::<Vec<u8>>(v))
            .transpose()
            .map_err(|e| MessagingError::Encoding(e.to_string()))
    };

    let payload = bytes(FIELD_PAYLOAD)?
        .ok_or_else(|| MessagingError::Encoding("stream entry has no payload".into()))?;
    let key = bytes(FIELD_KEY)?
        .map(|k| String::from_utf8(k).map_err(|e| MessagingError::Encoding(e.to_string())))
        .transpose()?;
    let headers = match bytes(FIELD_HEADERS)? {
        Some(raw) => serde_json::from_slice(&raw)?,
        None => HashMap::new(),
    };

    Ok(Message {
        payload,
        key,
        headers,
    })
}

#[async_trait]
impl MessagingClient for RedisStreamClient {
    fn backend(&self) -> &'static str {
        "redis_stream"
    }

    async fn send(&self, topic: &str, message: Message) -> Result<()> {
        let fields = to_fields(&message)?;
        let mut conn = self.conn.clone();
        let _id: String = conn
            .xadd(topic, "*", &fields)
            .await
            .map_err(|e| MessagingError::send(topic, e))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<Subscription> {
        self.ensure_group(topic).await?;

        let mut conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| MessagingError::subscribe(topic, e))?;

        let group = self.group.clone();
        let consumer = format!(
            "{}-{}-{}",
            group,
            std::process::id(),
            CONSUMER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let topic_name = topic.to_string();
        let token = CancellationToken::new();
        let stop = token.clone();

        info!(topic, %group, %consumer, "Joining stream consumer group");

        let handle = tokio::spawn(async move {
            let opts = StreamReadOptions::default()
                .group(&group, &consumer)
                .count(READ_BATCH)
                .block(READ_BLOCK_MS);
            let keys = [topic_name.clone()];

            loop {
                let read: redis::RedisResult<StreamReadReply> = tokio::select! {
                    _ = stop.cancelled() => break,
                    read = conn.xread_options(&keys, &[">"], &opts) => read,
                };

                let reply = match read {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(topic = %topic_name, error = %e, "Stream read failed, retrying");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                };

                for entry in reply.keys.into_iter().flat_map(|k| k.ids) {
                    match from_fields(&entry.map) {
                        Ok(message) => handler(message),
                        Err(e) => warn!(topic = %topic_name, id = %entry.id, error = %e, "Skipping undecodable stream entry"),
                    }
                    let acked: redis::RedisResult<i64> =
                        conn.xack(&topic_name, &group, &[&entry.id]).await;
                    if let Err(e) = acked {
                        warn!(topic = %topic_name, id = %entry.id, error = %e, "Failed to acknowledge stream entry");
                    }
                }
            }
            debug!(topic = %topic_name, "Stream subscription stopped");
        });

        Ok(Subscription::new(topic, token, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_map(fields: Vec<(&'static str, Vec<u8>)>) -> HashMap<String, Value> {
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::Data(v)))
            .collect()
    }

    #[test]
    fn test_fields_round_trip() {
        let msg = Message::new("payload")
            .with_key("match-1")
            .with_header("outcome", "success");

        let decoded = from_fields(&as_map(to_fields(&msg).unwrap())).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_minimal_fields() {
        let fields = to_fields(&Message::new("x")).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, FIELD_PAYLOAD);
    }

    #[test]
    fn test_missing_payload() {
        let mut map = HashMap::new();
        map.insert(FIELD_KEY.to_string(), Value::Data(b"k".to_vec()));
        assert!(from_fields(&map).is_err());
    }
}
