//! Messaging error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MessagingError>;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Unknown messaging backend: {0}")]
    UnknownBackend(String),

    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Failed to send to topic '{topic}': {reason}")]
    Send { topic: String, reason: String },

    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Message encoding error: {0}")]
    Encoding(String),
}

impl MessagingError {
    pub fn send(topic: &str, reason: impl ToString) -> Self {
        Self::Send {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn subscribe(topic: &str, reason: impl ToString) -> Self {
        Self::Subscribe {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}
