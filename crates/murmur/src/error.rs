//! Error types for the chat engine.

use murmur_core::DecodeError;
use murmur_store::StoreError;
use murmur_sync::{SyncError, TransportError};
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A frame or record could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Broker transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// REST API error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The operation is no longer offered by the server.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
