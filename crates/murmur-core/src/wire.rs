//! Text payload codecs for broker messages.
//!
//! - Receipt: `"<commentId>:<commentUniqueId>"`
//! - Presence: `"<0|1>:<epochMillisUTC>"`
//! - Typing: `"1"` or `"0"`

use chrono::{DateTime, TimeZone, Utc};

use crate::error::DecodeError;
use crate::types::{CommentId, UniqueId};

/// A delivery or read receipt payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptPayload {
    pub comment_id: CommentId,
    pub unique_id: UniqueId,
}

impl ReceiptPayload {
    pub fn new(comment_id: CommentId, unique_id: UniqueId) -> Self {
        Self {
            comment_id,
            unique_id,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.comment_id, self.unique_id)
    }

    /// Decode a receipt payload.
    ///
    /// Only the first `:` separates the fields, so unique ids may contain
    /// colons.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload)?;
        let (id, unique_id) = text
            .split_once(':')
            .ok_or_else(|| DecodeError::payload("receipt", text))?;
        let comment_id = id
            .trim()
            .parse()
            .map_err(|_| DecodeError::payload("receipt", text))?;
        if unique_id.is_empty() {
            return Err(DecodeError::payload("receipt", text));
        }
        Ok(Self {
            comment_id,
            unique_id: UniqueId::from(unique_id),
        })
    }
}

/// A presence payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresencePayload {
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

impl PresencePayload {
    pub fn new(online: bool, last_seen: DateTime<Utc>) -> Self {
        Self { online, last_seen }
    }

    /// Presence stamped with the current time.
    pub fn now(online: bool) -> Self {
        Self::new(online, Utc::now())
    }

    pub fn encode(&self) -> String {
        format!(
            "{}:{}",
            u8::from(self.online),
            self.last_seen.timestamp_millis()
        )
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload)?;
        let (flag, millis) = text
            .split_once(':')
            .ok_or_else(|| DecodeError::payload("presence", text))?;
        let online = match flag {
            "1" => true,
            "0" => false,
            _ => return Err(DecodeError::payload("presence", text)),
        };
        let millis: i64 = millis
            .trim()
            .parse()
            .map_err(|_| DecodeError::payload("presence", text))?;
        let last_seen = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| DecodeError::payload("presence", text))?;
        Ok(Self { online, last_seen })
    }
}

pub fn encode_typing(typing: bool) -> &'static str {
    if typing {
        "1"
    } else {
        "0"
    }
}

/// Decode a typing flag. Anything other than `"1"` means "stopped typing".
pub fn decode_typing(payload: &[u8]) -> bool {
    payload == b"1"
}
