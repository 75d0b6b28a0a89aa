//! Proptest generators for property-based testing.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use murmur_core::{Comment, CommentBuilder, CommentState, RoomId};

/// Any comment state.
pub fn comment_state() -> impl Strategy<Value = CommentState> {
    prop_oneof![
        Just(CommentState::Failed),
        Just(CommentState::Pending),
        Just(CommentState::Sending),
        Just(CommentState::Sent),
        Just(CommentState::Delivered),
        Just(CommentState::Read),
    ]
}

/// The states a receipt can carry.
pub fn receipt_state() -> impl Strategy<Value = CommentState> {
    prop_oneof![Just(CommentState::Delivered), Just(CommentState::Read)]
}

/// A sequence of receipt states, as they might arrive out of order.
pub fn receipt_sequence(max_len: usize) -> impl Strategy<Value = Vec<CommentState>> {
    prop::collection::vec(receipt_state(), 0..=max_len)
}

/// A message body.
pub fn message() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?]{0,64}".prop_map(String::from)
}

/// A sender address.
pub fn sender() -> impl Strategy<Value = String> {
    "[a-z]{1,8}@example\\.com".prop_map(String::from)
}

/// A timestamp between 2020 and 2030, at millisecond precision.
pub fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (1_577_836_800_000i64..1_893_456_000_000i64)
        .prop_map(|millis| Utc.timestamp_millis_opt(millis).single().unwrap_or_default())
}

/// Parameters for generating an acknowledged comment.
#[derive(Debug, Clone)]
pub struct CommentParams {
    pub room_id: u64,
    pub id: u64,
    pub before_id: u64,
    pub sender: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub state: CommentState,
}

impl Arbitrary for CommentParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            1u64..=50,         // room
            1u64..=100_000,    // id
            sender(),
            message(),
            timestamp(),
            prop_oneof![Just(CommentState::Sent), receipt_state()],
        )
            .prop_flat_map(|(room_id, id, sender, message, timestamp, state)| {
                (0..id).prop_map(move |before_id| CommentParams {
                    room_id,
                    id,
                    before_id,
                    sender: sender.clone(),
                    message: message.clone(),
                    timestamp,
                    state,
                })
            })
            .boxed()
    }
}

/// Build a comment from parameters.
pub fn comment_from_params(params: &CommentParams) -> Comment {
    CommentBuilder::new(RoomId(params.room_id), params.sender.as_str())
        .id(params.id)
        .unique_id(format!("u-{}", params.id))
        .before(params.before_id)
        .message(params.message.clone())
        .timestamp(params.timestamp)
        .state(params.state)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::CommentRecord;

    proptest! {
        #[test]
        fn test_state_never_regresses(start in comment_state(), receipts in receipt_sequence(16)) {
            let mut comment = CommentBuilder::new(RoomId(1), "bob").state(start).build();
            let mut highest = start;
            for state in receipts {
                comment.advance_state(state);
                highest = highest.max(state);
                prop_assert_eq!(comment.state, highest);
            }
        }

        #[test]
        fn test_record_preserves_identity(params: CommentParams) {
            let comment = comment_from_params(&params);
            let record = CommentRecord::from_comment(&comment);
            let decoded = Comment::try_from(record).unwrap();

            prop_assert_eq!(decoded.id, comment.id);
            prop_assert_eq!(decoded.unique_id, comment.unique_id);
            prop_assert_eq!(decoded.before_id, comment.before_id);
            prop_assert_eq!(decoded.timestamp, comment.timestamp);
            prop_assert_eq!(decoded.state, comment.state);
        }
    }
}
