//! Comment state machine: the single write path for comments.
//!
//! Push frames, catch-up records, receipts and local lifecycle changes all go
//! through here. Every read-modify-write runs under the room lock, and the
//! merge rules (identity by unique id or server id, monotonic state, sticky
//! redaction) make the final record independent of arrival order.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use murmur_core::{Comment, CommentId, CommentState, ReceiptPayload, RoomId, UniqueId, UserId};
use murmur_store::{CommentKey, Store};

use crate::error::Result;
use crate::locks::RoomLocks;

/// Result of applying a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No stored record matched; the comment was inserted.
    Inserted,
    /// A stored record was merged and written back.
    Updated,
    /// The stored record already reflected everything in the input.
    Unchanged,
}

/// Result of applying a delivery or read receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// The comment moved to the receipt's state.
    Advanced,
    /// The comment was already at or past the receipt's state.
    Unchanged,
    /// The comment is not stored locally.
    NotFound,
}

/// Applies comments and receipts to the store.
pub struct CommentStateMachine<S: Store> {
    store: Arc<S>,
    locks: Arc<RoomLocks>,
}

impl<S: Store> CommentStateMachine<S> {
    pub fn new(store: Arc<S>, locks: Arc<RoomLocks>) -> Self {
        Self { store, locks }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The room locks shared with the other store writers.
    pub fn locks(&self) -> &Arc<RoomLocks> {
        &self.locks
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Remote Input
    // ─────────────────────────────────────────────────────────────────────────

    /// Merge a comment received from the server into the store.
    ///
    /// The stored record is found by unique id, then by server id. A
    /// `before_id` that names a hard-deleted comment is rewritten to the
    /// nearest live predecessor, so a stale copy cannot undo a chain repair.
    ///
    /// Returns the outcome and the record as stored.
    pub async fn apply_comment(&self, mut incoming: Comment) -> Result<(ApplyOutcome, Comment)> {
        let _guard = self.locks.lock(incoming.room_id).await;

        incoming.before_id = self.live_predecessor(incoming.before_id).await?;

        if let Some(mut stored) = self.find(&incoming.unique_id, incoming.id).await? {
            if !stored.merge_from(&incoming) {
                return Ok((ApplyOutcome::Unchanged, stored));
            }
            self.store.add_or_update(&stored).await?;
            debug!(
                room = %stored.room_id,
                unique_id = %stored.unique_id,
                state = stored.state.as_str(),
                "comment merged"
            );
            return Ok((ApplyOutcome::Updated, stored));
        }

        if incoming.room_name.is_none() {
            if let Some(room) = self.store.get_chat_room(incoming.room_id).await? {
                incoming.stamp_room(&room);
            }
        }
        self.store.add_or_update(&incoming).await?;
        debug!(room = %incoming.room_id, unique_id = %incoming.unique_id, "comment inserted");
        Ok((ApplyOutcome::Inserted, incoming))
    }

    /// Apply a delivery or read receipt sent by `member`.
    ///
    /// The member's watermark on the stored room is raised as well. A receipt
    /// for a comment we do not have is a no-op.
    pub async fn apply_receipt(
        &self,
        room_id: RoomId,
        member: &UserId,
        state: CommentState,
        receipt: &ReceiptPayload,
    ) -> Result<ReceiptOutcome> {
        let _guard = self.locks.lock(room_id).await;

        self.raise_watermark(room_id, member, state, receipt.comment_id)
            .await?;

        let Some(mut comment) = self
            .find(&receipt.unique_id, Some(receipt.comment_id))
            .await?
        else {
            debug!(
                room = %room_id,
                comment_id = %receipt.comment_id,
                "receipt for unknown comment"
            );
            return Ok(ReceiptOutcome::NotFound);
        };

        if !comment.advance_state(state) {
            return Ok(ReceiptOutcome::Unchanged);
        }
        self.store.add_or_update(&comment).await?;
        Ok(ReceiptOutcome::Advanced)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a freshly composed comment as `Pending`.
    ///
    /// If a comment with the same unique id is already stored, that record is
    /// returned untouched.
    pub async fn record_pending(&self, mut comment: Comment) -> Result<Comment> {
        let _guard = self.locks.lock(comment.room_id).await;

        let key = CommentKey::Unique(comment.unique_id.clone());
        if let Some(existing) = self.store.get_comment(&key).await? {
            return Ok(existing);
        }

        comment.state = CommentState::Pending;
        if let Some(room) = self.store.get_chat_room(comment.room_id).await? {
            comment.stamp_room(&room);
        }
        self.store.add_or_update(&comment).await?;
        Ok(comment)
    }

    /// Mark a local comment as being sent. Returns `true` if it changed.
    pub async fn mark_sending(&self, unique_id: &UniqueId) -> Result<bool> {
        self.update_local(unique_id, |c| c.advance_state(CommentState::Sending))
            .await
    }

    /// Mark a local comment as failed.
    ///
    /// Only comments the server has not acknowledged can fail; later states
    /// are left alone and `false` is returned.
    pub async fn mark_failed(&self, unique_id: &UniqueId) -> Result<bool> {
        self.update_local(unique_id, |c| {
            if c.state >= CommentState::Sent || c.state == CommentState::Failed {
                return false;
            }
            c.state = CommentState::Failed;
            true
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn find(&self, unique_id: &UniqueId, id: Option<CommentId>) -> Result<Option<Comment>> {
        if let Some(found) = self
            .store
            .get_comment(&CommentKey::Unique(unique_id.clone()))
            .await?
        {
            return Ok(Some(found));
        }
        match id {
            Some(id) => Ok(self.store.get_comment(&CommentKey::Id(id)).await?),
            None => Ok(None),
        }
    }

    /// Follow `before_id` past hard-deleted comments.
    async fn live_predecessor(&self, before_id: Option<CommentId>) -> Result<Option<CommentId>> {
        let mut seen = HashSet::new();
        let mut cursor = before_id;

        while let Some(id) = cursor {
            if !seen.insert(id) {
                break;
            }
            match self.store.get_comment(&CommentKey::Id(id)).await? {
                Some(node) if node.hard_deleted => cursor = node.before_id,
                _ => return Ok(Some(id)),
            }
        }
        Ok(cursor)
    }

    async fn raise_watermark(
        &self,
        room_id: RoomId,
        member: &UserId,
        state: CommentState,
        comment_id: CommentId,
    ) -> Result<()> {
        let Some(mut room) = self.store.get_chat_room(room_id).await? else {
            return Ok(());
        };
        let raised = room
            .member_mut(member)
            .is_some_and(|m| m.record_receipt(state, comment_id));
        if raised {
            self.store.add_or_update_room(&room).await?;
        }
        Ok(())
    }

    async fn update_local<F>(&self, unique_id: &UniqueId, update: F) -> Result<bool>
    where
        F: FnOnce(&mut Comment) -> bool,
    {
        let key = CommentKey::Unique(unique_id.clone());
        let Some(found) = self.store.get_comment(&key).await? else {
            return Ok(false);
        };

        let _guard = self.locks.lock(found.room_id).await;
        let Some(mut comment) = self.store.get_comment(&key).await? else {
            return Ok(false);
        };
        if !update(&mut comment) {
            return Ok(false);
        }
        self.store.add_or_update(&comment).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{ChatRoom, CommentBuilder, RoomMember};
    use murmur_store::MemoryStore;

    fn machine() -> CommentStateMachine<MemoryStore> {
        CommentStateMachine::new(Arc::new(MemoryStore::new()), Arc::new(RoomLocks::new()))
    }

    fn remote(id: u64, before: u64) -> Comment {
        CommentBuilder::new(RoomId(1), "bob")
            .id(id)
            .unique_id(format!("u-{id}"))
            .before(before)
            .message(format!("message {id}"))
            .state(CommentState::Sent)
            .build()
    }

    async fn stored(machine: &CommentStateMachine<MemoryStore>, id: u64) -> Comment {
        machine
            .store()
            .get_comment(&CommentKey::Id(CommentId(id)))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_apply_insert_then_unchanged() {
        let machine = machine();
        let (outcome, _) = machine.apply_comment(remote(1, 0)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Inserted);

        let (outcome, _) = machine.apply_comment(remote(1, 0)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_server_copy_confirms_pending_comment() {
        let machine = machine();
        let pending = CommentBuilder::new(RoomId(1), "alice")
            .unique_id("local-1")
            .message("hi")
            .build();
        machine.record_pending(pending).await.unwrap();

        let server = CommentBuilder::new(RoomId(1), "alice")
            .id(42)
            .unique_id("local-1")
            .message("hi")
            .state(CommentState::Sent)
            .build();
        let (outcome, merged) = machine.apply_comment(server).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Updated);
        assert_eq!(merged.id, Some(CommentId(42)));
        assert_eq!(merged.state, CommentState::Sent);
    }

    #[tokio::test]
    async fn test_stale_copy_does_not_regress_state() {
        let machine = machine();
        machine.apply_comment(remote(1, 0)).await.unwrap();
        machine
            .apply_receipt(
                RoomId(1),
                &UserId::from("carol"),
                CommentState::Read,
                &ReceiptPayload::new(CommentId(1), UniqueId::from("u-1")),
            )
            .await
            .unwrap();

        machine.apply_comment(remote(1, 0)).await.unwrap();
        assert_eq!(stored(&machine, 1).await.state, CommentState::Read);
    }

    #[tokio::test]
    async fn test_stale_predecessor_skips_hard_deleted() {
        let machine = machine();
        machine.apply_comment(remote(1, 0)).await.unwrap();
        let mut b = remote(2, 1);
        b.redact(true);
        machine.apply_comment(b).await.unwrap();

        machine.apply_comment(remote(3, 2)).await.unwrap();
        assert_eq!(stored(&machine, 3).await.before_id, Some(CommentId(1)));
    }

    #[tokio::test]
    async fn test_receipt_outcomes() {
        let machine = machine();
        let receipt = ReceiptPayload::new(CommentId(1), UniqueId::from("u-1"));
        let carol = UserId::from("carol");

        let missing = machine
            .apply_receipt(RoomId(1), &carol, CommentState::Delivered, &receipt)
            .await
            .unwrap();
        assert_eq!(missing, ReceiptOutcome::NotFound);

        machine.apply_comment(remote(1, 0)).await.unwrap();
        let advanced = machine
            .apply_receipt(RoomId(1), &carol, CommentState::Read, &receipt)
            .await
            .unwrap();
        assert_eq!(advanced, ReceiptOutcome::Advanced);

        let late = machine
            .apply_receipt(RoomId(1), &carol, CommentState::Delivered, &receipt)
            .await
            .unwrap();
        assert_eq!(late, ReceiptOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_receipt_raises_member_watermark() {
        let machine = machine();
        let mut room = ChatRoom::new(RoomId(1), "general");
        room.members.push(RoomMember::new("carol", "Carol"));
        machine.store().add_or_update_room(&room).await.unwrap();

        machine
            .apply_receipt(
                RoomId(1),
                &UserId::from("carol"),
                CommentState::Read,
                &ReceiptPayload::new(CommentId(9), UniqueId::from("u-9")),
            )
            .await
            .unwrap();

        let room = machine
            .store()
            .get_chat_room(RoomId(1))
            .await
            .unwrap()
            .unwrap();
        let carol = room.member(&UserId::from("carol")).unwrap();
        assert_eq!(carol.last_read_comment_id, Some(CommentId(9)));
        assert_eq!(carol.last_delivered_comment_id, Some(CommentId(9)));
    }

    #[tokio::test]
    async fn test_local_lifecycle() {
        let machine = machine();
        let comment = CommentBuilder::new(RoomId(1), "alice")
            .unique_id("local-1")
            .build();
        let unique = comment.unique_id.clone();
        machine.record_pending(comment).await.unwrap();

        assert!(machine.mark_sending(&unique).await.unwrap());
        assert!(!machine.mark_sending(&unique).await.unwrap());
        assert!(machine.mark_failed(&unique).await.unwrap());
        assert!(!machine.mark_failed(&unique).await.unwrap());

        // A retry moves forward out of Failed.
        assert!(machine.mark_sending(&unique).await.unwrap());

        let mut server = machine
            .store()
            .get_comment(&CommentKey::Unique(unique.clone()))
            .await
            .unwrap()
            .unwrap();
        server.id = Some(CommentId(5));
        server.state = CommentState::Sent;
        machine.apply_comment(server).await.unwrap();
        assert!(!machine.mark_failed(&unique).await.unwrap());

        assert!(!machine
            .mark_sending(&UniqueId::from("missing"))
            .await
            .unwrap());
    }
}
