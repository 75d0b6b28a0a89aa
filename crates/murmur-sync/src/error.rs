//! Error types for the sync module.

use thiserror::Error;

/// Errors raised by the broker connection and the transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No live broker connection.
    #[error("not connected to broker")]
    NotConnected,

    /// The broker refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// An established connection dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A publish could not be handed to the broker.
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// A subscribe or unsubscribe request failed.
    #[error("subscription to {filter} failed: {reason}")]
    Subscribe { filter: String, reason: String },

    /// The session task is already running.
    #[error("session already started")]
    AlreadyStarted,

    /// The session was shut down.
    #[error("session cancelled")]
    Cancelled,
}

/// Errors raised by the REST catch-up adapters.
#[derive(Debug, Error)]
pub enum SyncError {
    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response did not have the expected envelope.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// JSON decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint is not reachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
