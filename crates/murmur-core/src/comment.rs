//! Comment: a single chat message and its delivery state.
//!
//! A comment is created locally as `Pending` without a server id, confirmed
//! when the server acknowledges it, advanced by delivery/read receipts, and
//! may be redacted (soft or hard deleted) at any later point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::ChatRoom;
use crate::types::{CommentId, RoomId, TopicId, UniqueId, UserId};

/// Content that replaces the message of a deleted comment.
pub const DELETED_PLACEHOLDER: &str = "This message has been deleted.";

/// Raw type of a plain text comment (also used for redacted comments).
pub const TEXT_TYPE: &str = "text";

/// Delivery state of a comment.
///
/// Variants are declared in ascending order; the derived `Ord` is the
/// progression order used for monotonic updates:
/// `Failed < Pending < Sending < Sent < Delivered < Read`.
///
/// `Failed` ranks lowest so that a retried comment can move forward out of
/// it. Moving *into* `Failed` is only possible through an explicit local
/// failure, never through the apply path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentState {
    Failed,
    Pending,
    Sending,
    Sent,
    Delivered,
    Read,
}

impl CommentState {
    /// Whether the server has acknowledged a comment in this state.
    pub fn is_acknowledged(self) -> bool {
        self >= CommentState::Sent
    }

    /// Stable string form, used for storage columns.
    pub fn as_str(self) -> &'static str {
        match self {
            CommentState::Failed => "failed",
            CommentState::Pending => "pending",
            CommentState::Sending => "sending",
            CommentState::Sent => "sent",
            CommentState::Delivered => "delivered",
            CommentState::Read => "read",
        }
    }

    /// Parse the string form produced by [`CommentState::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "failed" => Some(CommentState::Failed),
            "pending" => Some(CommentState::Pending),
            "sending" => Some(CommentState::Sending),
            "sent" => Some(CommentState::Sent),
            "delivered" => Some(CommentState::Delivered),
            "read" => Some(CommentState::Read),
            _ => None,
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Server id; `None` until acknowledged.
    pub id: Option<CommentId>,
    /// Client idempotency key.
    pub unique_id: UniqueId,
    pub room_id: RoomId,
    pub topic_id: TopicId,
    /// Previous comment in the room ordering; `None` for the oldest.
    pub before_id: Option<CommentId>,
    pub message: String,
    pub raw_type: String,
    pub payload: Option<Value>,
    pub extras: Option<Value>,
    pub sender_email: UserId,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub state: CommentState,
    pub deleted: bool,
    pub hard_deleted: bool,
    /// Denormalized room metadata for offline display.
    pub room_name: Option<String>,
    pub room_avatar: Option<String>,
    pub group_message: bool,
}

impl Comment {
    /// Whether the server has assigned an id.
    pub fn is_acknowledged(&self) -> bool {
        self.id.is_some()
    }

    /// Whether this comment still takes part in chain traversal.
    pub fn is_live(&self) -> bool {
        !self.hard_deleted
    }

    /// Advance the delivery state. Returns `true` if the state moved.
    ///
    /// Never moves backward: a stale or duplicate state is a no-op.
    pub fn advance_state(&mut self, to: CommentState) -> bool {
        if to > self.state {
            self.state = to;
            true
        } else {
            false
        }
    }

    /// Replace the content with the deletion placeholder.
    ///
    /// Chain pointers are left untouched; repairing the chain on a hard
    /// delete is the reconciler's job.
    pub fn redact(&mut self, hard: bool) {
        self.message = DELETED_PLACEHOLDER.to_string();
        self.raw_type = TEXT_TYPE.to_string();
        self.payload = None;
        self.deleted = true;
        if hard {
            self.hard_deleted = true;
        }
    }

    /// Copy denormalized room metadata onto this comment.
    pub fn stamp_room(&mut self, room: &ChatRoom) {
        self.room_name = Some(room.name.clone());
        self.room_avatar = room.avatar_url.clone();
        self.group_message = room.is_group;
    }

    /// Merge a server-provided copy of this comment into the stored record.
    ///
    /// Server-assigned fields (`id`, `before_id`, timestamp, sender display
    /// fields) are taken from `incoming`. Content is taken from `incoming`
    /// only while this record is not redacted. Redaction flags are sticky and
    /// `state` never regresses.
    ///
    /// Returns `true` if anything changed.
    pub fn merge_from(&mut self, incoming: &Comment) -> bool {
        let previous = self.clone();

        if incoming.id.is_some() {
            self.id = incoming.id;
            self.timestamp = incoming.timestamp;
        }
        if incoming.before_id.is_some() {
            self.before_id = incoming.before_id;
        }
        if incoming.sender_name.is_some() {
            self.sender_name = incoming.sender_name.clone();
        }
        if incoming.sender_avatar.is_some() {
            self.sender_avatar = incoming.sender_avatar.clone();
        }
        if incoming.room_name.is_some() {
            self.room_name = incoming.room_name.clone();
            self.room_avatar = incoming.room_avatar.clone();
            self.group_message = incoming.group_message;
        }

        if !self.deleted {
            self.message = incoming.message.clone();
            self.raw_type = incoming.raw_type.clone();
            self.payload = incoming.payload.clone();
            self.extras = incoming.extras.clone();
        }
        if incoming.deleted {
            self.redact(incoming.hard_deleted);
        }

        self.advance_state(incoming.state);

        *self != previous
    }
}

/// Builder for comments.
///
/// ```
/// use murmur_core::{CommentBuilder, CommentState, RoomId, TopicId};
///
/// let comment = CommentBuilder::new(RoomId(1), "alice@example.com")
///     .topic(TopicId(1))
///     .message("hello")
///     .build();
/// assert_eq!(comment.state, CommentState::Pending);
/// assert!(comment.id.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct CommentBuilder {
    comment: Comment,
}

impl CommentBuilder {
    /// Start a new pending comment with a fresh unique id.
    pub fn new(room_id: RoomId, sender: impl Into<UserId>) -> Self {
        Self {
            comment: Comment {
                id: None,
                unique_id: UniqueId::generate(),
                room_id,
                topic_id: TopicId(room_id.get()),
                before_id: None,
                message: String::new(),
                raw_type: TEXT_TYPE.to_string(),
                payload: None,
                extras: None,
                sender_email: sender.into(),
                sender_name: None,
                sender_avatar: None,
                timestamp: Utc::now(),
                state: CommentState::Pending,
                deleted: false,
                hard_deleted: false,
                room_name: None,
                room_avatar: None,
                group_message: false,
            },
        }
    }

    pub fn id(mut self, id: u64) -> Self {
        self.comment.id = Some(CommentId(id));
        self
    }

    pub fn unique_id(mut self, unique_id: impl Into<UniqueId>) -> Self {
        self.comment.unique_id = unique_id.into();
        self
    }

    pub fn topic(mut self, topic_id: TopicId) -> Self {
        self.comment.topic_id = topic_id;
        self
    }

    /// Set the predecessor. `0` means none, as on the wire.
    pub fn before(mut self, before_id: u64) -> Self {
        self.comment.before_id = (before_id != 0).then_some(CommentId(before_id));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.comment.message = message.into();
        self
    }

    pub fn raw_type(mut self, raw_type: impl Into<String>) -> Self {
        self.comment.raw_type = raw_type.into();
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.comment.payload = Some(payload);
        self
    }

    pub fn extras(mut self, extras: Value) -> Self {
        self.comment.extras = Some(extras);
        self
    }

    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.comment.sender_name = Some(name.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.comment.timestamp = timestamp;
        self
    }

    pub fn state(mut self, state: CommentState) -> Self {
        self.comment.state = state;
        self
    }

    pub fn build(self) -> Comment {
        self.comment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Comment {
        CommentBuilder::new(RoomId(1), "alice@example.com")
            .unique_id("u-1")
            .message("hi")
            .build()
    }

    #[test]
    fn test_state_order() {
        assert!(CommentState::Failed < CommentState::Pending);
        assert!(CommentState::Pending < CommentState::Sending);
        assert!(CommentState::Sending < CommentState::Sent);
        assert!(CommentState::Sent < CommentState::Delivered);
        assert!(CommentState::Delivered < CommentState::Read);
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in [
            CommentState::Failed,
            CommentState::Pending,
            CommentState::Sending,
            CommentState::Sent,
            CommentState::Delivered,
            CommentState::Read,
        ] {
            assert_eq!(CommentState::parse(state.as_str()), Some(state));
        }
        assert_eq!(CommentState::parse("bogus"), None);
    }

    #[test]
    fn test_advance_state_never_regresses() {
        let mut comment = sample();
        assert!(comment.advance_state(CommentState::Read));
        assert!(!comment.advance_state(CommentState::Delivered));
        assert_eq!(comment.state, CommentState::Read);
    }

    #[test]
    fn test_redact_hard_implies_deleted() {
        let mut comment = sample();
        comment.payload = Some(serde_json::json!({"url": "x"}));
        comment.redact(true);
        assert!(comment.deleted);
        assert!(comment.hard_deleted);
        assert_eq!(comment.message, DELETED_PLACEHOLDER);
        assert_eq!(comment.raw_type, TEXT_TYPE);
        assert!(comment.payload.is_none());
    }

    #[test]
    fn test_merge_takes_server_fields() {
        let mut local = sample();
        let server = CommentBuilder::new(RoomId(1), "alice@example.com")
            .unique_id("u-1")
            .id(10)
            .before(9)
            .message("hi")
            .state(CommentState::Sent)
            .build();

        assert!(local.merge_from(&server));
        assert_eq!(local.id, Some(CommentId(10)));
        assert_eq!(local.before_id, Some(CommentId(9)));
        assert_eq!(local.state, CommentState::Sent);
        assert_eq!(local.timestamp, server.timestamp);

        // Merging the same copy again changes nothing.
        assert!(!local.merge_from(&server));
    }

    #[test]
    fn test_merge_keeps_redaction() {
        let mut local = sample();
        local.redact(false);

        let server = CommentBuilder::new(RoomId(1), "alice@example.com")
            .unique_id("u-1")
            .id(10)
            .message("original text")
            .state(CommentState::Sent)
            .build();
        local.merge_from(&server);

        assert!(local.deleted);
        assert_eq!(local.message, DELETED_PLACEHOLDER);
    }

    #[test]
    fn test_merge_does_not_regress_state() {
        let mut local = sample();
        local.state = CommentState::Read;
        let server = CommentBuilder::new(RoomId(1), "alice@example.com")
            .unique_id("u-1")
            .id(10)
            .message("hi")
            .state(CommentState::Sent)
            .build();
        local.merge_from(&server);
        assert_eq!(local.state, CommentState::Read);
    }
}
