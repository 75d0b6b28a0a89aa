//! Delete reconciler: applies server-confirmed deletions to the store.
//!
//! A soft delete replaces the content with a placeholder and leaves the room
//! chain alone. A hard delete also takes the comment out of the chain: its
//! live successor inherits its `before_id`, so `A <- B <- C` becomes
//! `A <- C`. The successor and target writes happen under one room lock.

use std::sync::Arc;

use tracing::{debug, info, warn};

use murmur_core::{Comment, RoomId, UniqueId, UserId};
use murmur_store::{CommentKey, Store};

use crate::error::Result;
use crate::listener::EventHub;
use crate::locks::RoomLocks;

/// One comment to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTarget {
    pub room_id: RoomId,
    pub unique_id: UniqueId,
}

impl DeleteTarget {
    pub fn new(room_id: RoomId, unique_id: impl Into<UniqueId>) -> Self {
        Self {
            room_id,
            unique_id: unique_id.into(),
        }
    }
}

/// A batch of deletions performed by one member.
#[derive(Debug, Clone)]
pub struct DeleteBatch {
    pub targets: Vec<DeleteTarget>,
    pub hard: bool,
    pub actor: UserId,
}

/// What a reconcile pass did.
#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    /// Comments as stored after deletion, in batch order.
    pub deleted: Vec<Comment>,
    /// Targets not present in the store.
    pub skipped: usize,
    /// Targets whose store writes failed.
    pub failed: usize,
}

enum TargetOutcome {
    Deleted(Comment),
    Skipped,
}

/// Applies delete batches and notifies delete listeners.
pub struct DeleteReconciler<S: Store> {
    store: Arc<S>,
    locks: Arc<RoomLocks>,
    hub: EventHub,
}

impl<S: Store> DeleteReconciler<S> {
    pub fn new(store: Arc<S>, locks: Arc<RoomLocks>, hub: EventHub) -> Self {
        Self { store, locks, hub }
    }

    /// Apply a batch.
    ///
    /// Missing comments are skipped and store failures are logged per item;
    /// neither stops the batch. Exactly one notification is delivered
    /// afterwards, even when nothing was deleted.
    pub async fn reconcile(&self, batch: DeleteBatch) -> DeleteReport {
        let mut report = DeleteReport::default();

        for target in &batch.targets {
            match self.delete_one(target, batch.hard).await {
                Ok(TargetOutcome::Deleted(comment)) => report.deleted.push(comment),
                Ok(TargetOutcome::Skipped) => {
                    debug!(
                        room = %target.room_id,
                        unique_id = %target.unique_id,
                        "delete target not stored"
                    );
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        room = %target.room_id,
                        unique_id = %target.unique_id,
                        error = %e,
                        "failed to delete comment"
                    );
                    report.failed += 1;
                }
            }
        }

        for comment in &report.deleted {
            let Some(id) = comment.id else { continue };
            if let Err(e) = self.store.delete_local_attachment(id).await {
                warn!(comment_id = %id, error = %e, "failed to clear local attachment");
            }
        }

        info!(
            deleted = report.deleted.len(),
            skipped = report.skipped,
            failed = report.failed,
            hard = batch.hard,
            actor = %batch.actor,
            "delete batch reconciled"
        );
        self.hub
            .notify_deleted(report.deleted.clone(), batch.hard, batch.actor)
            .await;

        report
    }

    async fn delete_one(&self, target: &DeleteTarget, hard: bool) -> Result<TargetOutcome> {
        let _guard = self.locks.lock(target.room_id).await;

        let key = CommentKey::Unique(target.unique_id.clone());
        let Some(mut comment) = self.store.get_comment(&key).await? else {
            return Ok(TargetOutcome::Skipped);
        };

        comment.redact(hard);
        if let Some(room) = self.store.get_chat_room(target.room_id).await? {
            comment.stamp_room(&room);
        }

        if hard {
            if let Some(id) = comment.id {
                if let Some(mut successor) = self.store.get_comment_by_before_id(id).await? {
                    if successor.unique_id != comment.unique_id {
                        successor.before_id = comment.before_id;
                        self.store.add_or_update(&successor).await?;
                        debug!(
                            room = %target.room_id,
                            successor = %successor.unique_id,
                            "chain repaired"
                        );
                    }
                }
            }
        }

        self.store.add_or_update(&comment).await?;
        Ok(TargetOutcome::Deleted(comment))
    }
}
