//! Inbound broker frames decoded into typed events.

use murmur_core::{
    decode_typing, Comment, CommentRecord, CommentState, DecodeError, PresencePayload,
    ReceiptPayload, RoomEventKind, RoomId, Topic, TopicId, UserId,
};

use crate::broker::Publish;

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A comment delivered on the private channel.
    NewComment(Comment),
    /// A user started or stopped typing.
    Typing {
        room_id: RoomId,
        topic_id: TopicId,
        user: UserId,
        typing: bool,
    },
    /// A delivery or read receipt from another member.
    Receipt {
        room_id: RoomId,
        topic_id: TopicId,
        user: UserId,
        /// `Delivered` or `Read`.
        state: CommentState,
        receipt: ReceiptPayload,
    },
    /// A presence change.
    Presence {
        user: UserId,
        presence: PresencePayload,
    },
}

impl InboundEvent {
    /// Decode a broker frame.
    pub fn decode(publish: &Publish) -> Result<Self, DecodeError> {
        let payload = publish.payload.as_ref();

        match Topic::parse(&publish.topic)? {
            Topic::NewComments { .. } => {
                let record = CommentRecord::from_slice(payload)?;
                Ok(InboundEvent::NewComment(Comment::try_from(record)?))
            }
            Topic::Room {
                room_id,
                topic_id,
                user,
                kind: RoomEventKind::Typing,
            } => Ok(InboundEvent::Typing {
                room_id,
                topic_id,
                user,
                typing: decode_typing(payload),
            }),
            Topic::Room {
                room_id,
                topic_id,
                user,
                kind,
            } => Ok(InboundEvent::Receipt {
                room_id,
                topic_id,
                user,
                state: if kind == RoomEventKind::Read {
                    CommentState::Read
                } else {
                    CommentState::Delivered
                },
                receipt: ReceiptPayload::decode(payload)?,
            }),
            Topic::UserStatus { user } => Ok(InboundEvent::Presence {
                user,
                presence: PresencePayload::decode(payload)?,
            }),
        }
    }

    /// The user this event originates from.
    pub fn origin(&self) -> &UserId {
        match self {
            InboundEvent::NewComment(comment) => &comment.sender_email,
            InboundEvent::Typing { user, .. }
            | InboundEvent::Receipt { user, .. }
            | InboundEvent::Presence { user, .. } => user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::QoS;
    use murmur_core::CommentId;

    fn frame(topic: &str, payload: &'static str) -> Publish {
        Publish::new(topic, payload, QoS::AtLeastOnce, false)
    }

    #[test]
    fn test_decode_receipts() {
        let event = InboundEvent::decode(&frame("room/3/3/bob/r", "10:u-10")).unwrap();
        match event {
            InboundEvent::Receipt {
                room_id,
                state,
                receipt,
                ..
            } => {
                assert_eq!(room_id, RoomId(3));
                assert_eq!(state, CommentState::Read);
                assert_eq!(receipt.comment_id, CommentId(10));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let delivered = InboundEvent::decode(&frame("room/3/3/bob/d", "10:u-10")).unwrap();
        assert!(matches!(
            delivered,
            InboundEvent::Receipt {
                state: CommentState::Delivered,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_typing_and_presence() {
        let typing = InboundEvent::decode(&frame("room/3/4/bob/t", "1")).unwrap();
        assert_eq!(
            typing,
            InboundEvent::Typing {
                room_id: RoomId(3),
                topic_id: TopicId(4),
                user: UserId::from("bob"),
                typing: true,
            }
        );
        assert_eq!(typing.origin(), &UserId::from("bob"));

        let presence = InboundEvent::decode(&frame("user/bob/status", "0:1700000000000")).unwrap();
        assert!(matches!(
            presence,
            InboundEvent::Presence { presence, .. } if !presence.online
        ));
    }

    #[test]
    fn test_decode_new_comment() {
        let payload = r#"{"id":5,"unique_temp_id":"u-5","room_id":3,"topic_id":3,
            "comment_before_id":4,"message":"hey","type":"text","email":"bob",
            "unix_nano_timestamp":1700000000000000000}"#;
        let event = InboundEvent::decode(&frame("tok/c", payload)).unwrap();
        match event {
            InboundEvent::NewComment(comment) => {
                assert_eq!(comment.id, Some(CommentId(5)));
                assert_eq!(comment.sender_email, UserId::from("bob"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(InboundEvent::decode(&frame("tok/c", "not json")).is_err());
        assert!(InboundEvent::decode(&frame("room/3/3/bob/d", "garbage")).is_err());
        assert!(InboundEvent::decode(&frame("user/bob/status", "x")).is_err());
        assert!(InboundEvent::decode(&frame("nonsense", "1")).is_err());
    }
}
