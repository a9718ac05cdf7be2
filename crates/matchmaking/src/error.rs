//! Matchmaking error types

use thiserror::Error;

use crate::pair::MatchPair;

/// Result type alias for matchmaking operations
pub type Result<T> = std::result::Result<T, MatchingError>;

/// Errors raised by the engine and its configuration
#[derive(Error, Debug)]
pub enum MatchingError {
    /// Rejected configuration value
    #[error("Invalid matching configuration: {0}")]
    InvalidConfig(String),

    /// Engine lifecycle misuse
    #[error("Engine already running")]
    AlreadyRunning,
}

/// Errors raised by the notification pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Ring capacity must be a power of two
    #[error("Ring buffer size must be a power of two, got {0}")]
    InvalidRingSize(usize),

    /// Consumer pool must not be empty
    #[error("Notification pipeline needs at least one consumer")]
    NoConsumers,

    /// The pipeline stopped accepting pairs; the pair is handed back
    #[error("Notification pipeline is shut down")]
    ShutDown(Box<MatchPair>),
}

/// Failure writing to a live connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer has gone away
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Write failed on the wire
    #[error("Write failed: {0}")]
    WriteFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MatchingError::InvalidConfig("bucket_size must be positive, got 0".into());
        assert_eq!(
            err.to_string(),
            "Invalid matching configuration: bucket_size must be positive, got 0"
        );
        assert_eq!(MatchingError::AlreadyRunning.to_string(), "Engine already running");
        assert_eq!(
            PipelineError::InvalidRingSize(1000).to_string(),
            "Ring buffer size must be a power of two, got 1000"
        );
    }
}
