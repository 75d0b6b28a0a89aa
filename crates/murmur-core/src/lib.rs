//! # Murmur Core
//!
//! Pure primitives for Murmur: comments, rooms, broker topics and payloads.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! plain data plus the rules for how that data may change.
//!
//! ## Key Types
//!
//! - [`Comment`] - A single chat message with its delivery state
//! - [`CommentState`] - Monotonic delivery progression
//! - [`ChatRoom`] / [`RoomMember`] - Room metadata and per-member receipt watermarks
//! - [`Topic`] - Parsed broker routing key
//!
//! ## Wire Formats
//!
//! Broker payloads are small text codecs (see [`wire`]); comment records are
//! JSON (see [`record`]).

pub mod comment;
pub mod error;
pub mod record;
pub mod room;
pub mod topic;
pub mod types;
pub mod wire;

pub use comment::{Comment, CommentBuilder, CommentState, DELETED_PLACEHOLDER, TEXT_TYPE};
pub use error::DecodeError;
pub use record::{from_unix_nanos, to_unix_nanos, CommentRecord};
pub use room::{ChatRoom, RoomMember};
pub use topic::{
    new_comment_topic, room_filter, topic_matches, user_status_topic, RoomEventKind, Topic,
};
pub use types::{Account, CommentId, RoomId, TopicId, UniqueId, UserId};
pub use wire::{decode_typing, encode_typing, PresencePayload, ReceiptPayload};
