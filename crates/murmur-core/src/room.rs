//! Chat rooms and their members.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::comment::CommentState;
use crate::types::{CommentId, RoomId, UserId};

/// A participant of a room together with its receipt watermarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMember {
    pub email: UserId,
    pub username: String,
    pub avatar: Option<String>,
    /// Highest comment id this member has acknowledged as delivered.
    pub last_delivered_comment_id: Option<CommentId>,
    /// Highest comment id this member has read.
    pub last_read_comment_id: Option<CommentId>,
    pub extras: Option<Value>,
}

impl RoomMember {
    pub fn new(email: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            avatar: None,
            last_delivered_comment_id: None,
            last_read_comment_id: None,
            extras: None,
        }
    }

    /// Raise the watermark matching `state`.
    ///
    /// Reading implies delivery, so a read receipt raises both. Watermarks
    /// only move forward. Returns `true` if anything changed.
    pub fn record_receipt(&mut self, state: CommentState, comment_id: CommentId) -> bool {
        let mut changed = false;
        if state >= CommentState::Delivered {
            changed |= raise(&mut self.last_delivered_comment_id, comment_id);
        }
        if state >= CommentState::Read {
            changed |= raise(&mut self.last_read_comment_id, comment_id);
        }
        changed
    }
}

fn raise(slot: &mut Option<CommentId>, to: CommentId) -> bool {
    match slot {
        Some(current) if *current >= to => false,
        _ => {
            *slot = Some(to);
            true
        }
    }
}

/// Room metadata as fetched from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub unique_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub is_group: bool,
    pub members: Vec<RoomMember>,
}

impl ChatRoom {
    pub fn new(id: RoomId, name: impl Into<String>) -> Self {
        Self {
            id,
            unique_id: id.to_string(),
            name: name.into(),
            avatar_url: None,
            is_group: false,
            members: Vec::new(),
        }
    }

    pub fn member(&self, email: &UserId) -> Option<&RoomMember> {
        self.members.iter().find(|m| &m.email == email)
    }

    pub fn member_mut(&mut self, email: &UserId) -> Option<&mut RoomMember> {
        self.members.iter_mut().find(|m| &m.email == email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_receipt_raises_both_watermarks() {
        let mut member = RoomMember::new("bob@example.com", "bob");
        assert!(member.record_receipt(CommentState::Read, CommentId(5)));
        assert_eq!(member.last_delivered_comment_id, Some(CommentId(5)));
        assert_eq!(member.last_read_comment_id, Some(CommentId(5)));
    }

    #[test]
    fn test_watermarks_never_move_back() {
        let mut member = RoomMember::new("bob@example.com", "bob");
        member.record_receipt(CommentState::Delivered, CommentId(9));
        assert!(!member.record_receipt(CommentState::Delivered, CommentId(3)));
        assert_eq!(member.last_delivered_comment_id, Some(CommentId(9)));
        assert_eq!(member.last_read_comment_id, None);
    }

    #[test]
    fn test_member_lookup() {
        let mut room = ChatRoom::new(RoomId(1), "general");
        room.members.push(RoomMember::new("bob@example.com", "bob"));
        assert!(room.member(&UserId::from("bob@example.com")).is_some());
        assert!(room.member(&UserId::from("eve@example.com")).is_none());
    }
}
