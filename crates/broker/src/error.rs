//! Broker error types.

use thiserror::Error;

/// Broker error type.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection not found in the registry.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Broadcast attempted on a channel the sender never joined.
    #[error("Not subscribed to channel: {0}")]
    NotSubscribed(String),

    /// Outbound queue for a connection is closed or full.
    #[error("Channel send error")]
    ChannelSend,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
