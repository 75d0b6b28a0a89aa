//! Broker topic grammar.
//!
//! Topics are positional, `/`-separated routing keys:
//!
//! ```text
//! room/<roomId>/<topicId>/<userId>/t     typing
//! room/<roomId>/<topicId>/<userId>/d     delivery receipt
//! room/<roomId>/<topicId>/<userId>/r     read receipt
//! user/<userId>/status                   presence
//! <token>/c                              private new-comment channel
//! ```
//!
//! Subscription filters use `+` for a single level and `#` for all
//! remaining levels.

use std::fmt;

use crate::error::DecodeError;
use crate::types::{RoomId, TopicId, UserId};

const ROOM_PREFIX: &str = "room";
const USER_PREFIX: &str = "user";
const STATUS_SUFFIX: &str = "status";
const COMMENT_SUFFIX: &str = "c";

/// The kind of a per-room event topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomEventKind {
    Typing,
    Delivered,
    Read,
}

impl RoomEventKind {
    /// All kinds a room listener subscribes to.
    pub const ALL: [RoomEventKind; 3] = [
        RoomEventKind::Typing,
        RoomEventKind::Delivered,
        RoomEventKind::Read,
    ];

    /// The single-letter topic suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            RoomEventKind::Typing => "t",
            RoomEventKind::Delivered => "d",
            RoomEventKind::Read => "r",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "t" => Some(RoomEventKind::Typing),
            "d" => Some(RoomEventKind::Delivered),
            "r" => Some(RoomEventKind::Read),
            _ => None,
        }
    }
}

/// A parsed, concrete (wildcard-free) topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Room {
        room_id: RoomId,
        topic_id: TopicId,
        user: UserId,
        kind: RoomEventKind,
    },
    UserStatus {
        user: UserId,
    },
    NewComments {
        token: String,
    },
}

impl Topic {
    /// Parse a topic string.
    pub fn parse(topic: &str) -> Result<Self, DecodeError> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(DecodeError::MalformedTopic(topic.to_string()));
        }

        match parts.as_slice() {
            [ROOM_PREFIX, room, topic_id, user, kind] => {
                let kind = RoomEventKind::from_suffix(kind)
                    .ok_or_else(|| DecodeError::MalformedTopic(topic.to_string()))?;
                let room_id = room
                    .parse()
                    .map_err(|_| DecodeError::MalformedTopic(topic.to_string()))?;
                let topic_id = topic_id
                    .parse()
                    .map_err(|_| DecodeError::MalformedTopic(topic.to_string()))?;
                Ok(Topic::Room {
                    room_id,
                    topic_id,
                    user: UserId::from(*user),
                    kind,
                })
            }
            [USER_PREFIX, user, STATUS_SUFFIX] => Ok(Topic::UserStatus {
                user: UserId::from(*user),
            }),
            [token, COMMENT_SUFFIX] => Ok(Topic::NewComments {
                token: token.to_string(),
            }),
            _ => Err(DecodeError::MalformedTopic(topic.to_string())),
        }
    }

    /// The originating user, for topics that carry one.
    pub fn origin(&self) -> Option<&UserId> {
        match self {
            Topic::Room { user, .. } | Topic::UserStatus { user } => Some(user),
            Topic::NewComments { .. } => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Room {
                room_id,
                topic_id,
                user,
                kind,
            } => write!(
                f,
                "{ROOM_PREFIX}/{room_id}/{topic_id}/{user}/{}",
                kind.suffix()
            ),
            Topic::UserStatus { user } => write!(f, "{USER_PREFIX}/{user}/{STATUS_SUFFIX}"),
            Topic::NewComments { token } => write!(f, "{token}/{COMMENT_SUFFIX}"),
        }
    }
}

/// Subscription filter for one kind of event in a room, any topic, any user.
pub fn room_filter(room_id: RoomId, kind: RoomEventKind) -> String {
    format!("{ROOM_PREFIX}/{room_id}/+/+/{}", kind.suffix())
}

/// Presence topic of a user.
pub fn user_status_topic(user: &UserId) -> String {
    Topic::UserStatus { user: user.clone() }.to_string()
}

/// The private new-comment channel of a session token.
pub fn new_comment_topic(token: &str) -> String {
    Topic::NewComments {
        token: token.to_string(),
    }
    .to_string()
}

/// Check whether a concrete topic matches a subscription filter.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
