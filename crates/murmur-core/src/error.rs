//! Error types for Murmur Core.

use thiserror::Error;

/// Errors raised while decoding broker topics, broker payloads, or comment
/// records received from the server.
///
/// A decode error only ever concerns a single message. Callers drop the
/// offending message and keep going.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed topic: {0}")]
    MalformedTopic(String),

    #[error("malformed {kind} payload: {detail}")]
    MalformedPayload {
        kind: &'static str,
        detail: String,
    },

    #[error("invalid comment record: {0}")]
    InvalidRecord(String),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecodeError {
    pub(crate) fn payload(kind: &'static str, detail: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind,
            detail: detail.into(),
        }
    }
}
