//! Client error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation that requires an open connection was attempted while
    /// disconnected. Subscriptions are deferred instead of failing.
    #[error("Not connected")]
    NotConnected,

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Authentication timed out")]
    AuthTimeout,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// A channel operation that requires the joined state.
    #[error("Channel not joined: {0}")]
    NotJoined(String),

    #[error("Internal channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
