//! Comment records: the JSON form the server uses for comments.
//!
//! The same record shape arrives from the catch-up endpoint, the delete
//! endpoint, and the private new-comment broker channel.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::comment::{Comment, CommentState, TEXT_TYPE};
use crate::error::DecodeError;
use crate::types::{CommentId, RoomId, TopicId, UniqueId, UserId};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Convert a UTC timestamp to nanoseconds since the Unix epoch.
///
/// Returns `None` outside the range an `i64` of nanoseconds can hold
/// (roughly years 1677 to 2262).
pub fn to_unix_nanos(timestamp: &DateTime<Utc>) -> Option<i64> {
    timestamp.timestamp_nanos_opt()
}

/// Convert nanoseconds since the Unix epoch to a UTC timestamp.
pub fn from_unix_nanos(nanos: i64) -> Option<DateTime<Utc>> {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let subsec = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    Utc.timestamp_opt(secs, subsec).single()
}

/// A server comment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: u64,
    #[serde(rename = "unique_temp_id")]
    pub unique_id: String,
    pub room_id: u64,
    #[serde(default)]
    pub topic_id: Option<u64>,
    #[serde(rename = "comment_before_id", default)]
    pub before_id: Option<u64>,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default = "default_type")]
    pub raw_type: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub extras: Option<Value>,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub user_avatar_url: Option<String>,
    #[serde(default)]
    pub unix_nano_timestamp: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

fn default_type() -> String {
    TEXT_TYPE.to_string()
}

impl CommentRecord {
    /// Parse a record from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parse a record from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Build the record the server would send for `comment`.
    pub fn from_comment(comment: &Comment) -> Self {
        Self {
            id: comment.id.map_or(0, CommentId::get),
            unique_id: comment.unique_id.to_string(),
            room_id: comment.room_id.get(),
            topic_id: Some(comment.topic_id.get()),
            before_id: Some(comment.before_id.map_or(0, CommentId::get)),
            message: comment.message.clone(),
            raw_type: comment.raw_type.clone(),
            payload: comment.payload.clone(),
            extras: comment.extras.clone(),
            email: comment.sender_email.to_string(),
            username: comment.sender_name.clone(),
            user_avatar_url: comment.sender_avatar.clone(),
            unix_nano_timestamp: to_unix_nanos(&comment.timestamp),
            created_at: Some(comment.timestamp.to_rfc3339()),
            status: match comment.state {
                CommentState::Delivered | CommentState::Read => {
                    Some(comment.state.as_str().to_string())
                }
                _ => None,
            },
            is_deleted: comment.deleted,
        }
    }

    fn timestamp(&self) -> Result<DateTime<Utc>, DecodeError> {
        if let Some(nanos) = self.unix_nano_timestamp {
            return from_unix_nanos(nanos).ok_or_else(|| {
                DecodeError::InvalidRecord(format!("timestamp out of range: {nanos}"))
            });
        }
        if let Some(created_at) = &self.created_at {
            let timestamp = DateTime::parse_from_rfc3339(created_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| DecodeError::InvalidRecord(format!("created_at: {e}")))?;
            if to_unix_nanos(&timestamp).is_none() {
                return Err(DecodeError::InvalidRecord(format!(
                    "timestamp out of range: {created_at}"
                )));
            }
            return Ok(timestamp);
        }
        Err(DecodeError::InvalidRecord(format!(
            "comment {} has no timestamp",
            self.id
        )))
    }
}

impl TryFrom<CommentRecord> for Comment {
    type Error = DecodeError;

    fn try_from(record: CommentRecord) -> Result<Self, Self::Error> {
        if record.id == 0 {
            return Err(DecodeError::InvalidRecord("missing comment id".into()));
        }
        if record.unique_id.is_empty() {
            return Err(DecodeError::InvalidRecord(format!(
                "comment {} has no unique id",
                record.id
            )));
        }

        let timestamp = record.timestamp()?;
        let state = record
            .status
            .as_deref()
            .and_then(CommentState::parse)
            .filter(|s| s.is_acknowledged())
            .unwrap_or(CommentState::Sent);

        let mut comment = Comment {
            id: Some(CommentId(record.id)),
            unique_id: UniqueId::from(record.unique_id),
            room_id: RoomId(record.room_id),
            topic_id: TopicId(record.topic_id.unwrap_or(record.room_id)),
            before_id: record.before_id.filter(|id| *id != 0).map(CommentId),
            message: record.message,
            raw_type: record.raw_type,
            payload: record.payload.filter(|p| !p.is_null()),
            extras: record.extras.filter(|e| !e.is_null()),
            sender_email: UserId::from(record.email),
            sender_name: record.username,
            sender_avatar: record.user_avatar_url,
            timestamp,
            state,
            deleted: false,
            hard_deleted: false,
            room_name: None,
            room_avatar: None,
            group_message: false,
        };
        if record.is_deleted {
            comment.redact(false);
        }
        Ok(comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_json() -> Value {
        json!({
            "id": 12,
            "unique_temp_id": "murmur_abc",
            "room_id": 3,
            "topic_id": 3,
            "comment_before_id": 11,
            "message": "hello",
            "type": "text",
            "payload": null,
            "extras": {"k": "v"},
            "email": "bob@example.com",
            "username": "Bob",
            "unix_nano_timestamp": 1_700_000_000_123_456_789i64
        })
    }

    #[test]
    fn test_record_to_comment() {
        let record = CommentRecord::from_value(sample_json()).unwrap();
        let comment = Comment::try_from(record).unwrap();

        assert_eq!(comment.id, Some(CommentId(12)));
        assert_eq!(comment.unique_id.as_str(), "murmur_abc");
        assert_eq!(comment.before_id, Some(CommentId(11)));
        assert_eq!(comment.state, CommentState::Sent);
        assert_eq!(comment.sender_name.as_deref(), Some("Bob"));
        assert!(comment.payload.is_none());
        assert_eq!(comment.extras, Some(json!({"k": "v"})));
        assert_eq!(comment.timestamp.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn test_zero_before_id_means_oldest() {
        let mut value = sample_json();
        value["comment_before_id"] = json!(0);
        let comment = Comment::try_from(CommentRecord::from_value(value).unwrap()).unwrap();
        assert_eq!(comment.before_id, None);
    }

    #[test]
    fn test_created_at_fallback() {
        let mut value = sample_json();
        value.as_object_mut().unwrap().remove("unix_nano_timestamp");
        value["created_at"] = json!("2024-05-01T10:00:00Z");
        let comment = Comment::try_from(CommentRecord::from_value(value).unwrap()).unwrap();
        assert_eq!(comment.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_missing_timestamp_is_invalid() {
        let mut value = sample_json();
        value.as_object_mut().unwrap().remove("unix_nano_timestamp");
        let result = Comment::try_from(CommentRecord::from_value(value).unwrap());
        assert!(matches!(result, Err(DecodeError::InvalidRecord(_))));
    }

    #[test]
    fn test_out_of_range_created_at_is_invalid() {
        let mut value = sample_json();
        value.as_object_mut().unwrap().remove("unix_nano_timestamp");
        value["created_at"] = json!("9999-01-01T00:00:00Z");
        let result = Comment::try_from(CommentRecord::from_value(value).unwrap());
        assert!(matches!(result, Err(DecodeError::InvalidRecord(_))));
    }

    #[test]
    fn test_unix_nanos_range() {
        let far = Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_unix_nanos(&far), None);

        let near = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let nanos = to_unix_nanos(&near).unwrap();
        assert_eq!(from_unix_nanos(nanos), Some(near));
    }

    #[test]
    fn test_missing_required_field_is_json_error() {
        let mut value = sample_json();
        value.as_object_mut().unwrap().remove("email");
        assert!(matches!(
            CommentRecord::from_value(value),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_deleted_record_is_redacted() {
        let mut value = sample_json();
        value["is_deleted"] = json!(true);
        let comment = Comment::try_from(CommentRecord::from_value(value).unwrap()).unwrap();
        assert!(comment.deleted);
        assert!(!comment.hard_deleted);
    }

    #[test]
    fn test_status_maps_to_state() {
        let mut value = sample_json();
        value["status"] = json!("read");
        let comment = Comment::try_from(CommentRecord::from_value(value).unwrap()).unwrap();
        assert_eq!(comment.state, CommentState::Read);
    }

    #[test]
    fn test_from_comment_reparses_identically() {
        let record = CommentRecord::from_value(sample_json()).unwrap();
        let original = Comment::try_from(record).unwrap();
        let record = CommentRecord::from_comment(&original);
        let reparsed = Comment::try_from(record).unwrap();
        assert_eq!(original, reparsed);
    }
}
