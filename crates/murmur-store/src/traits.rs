//! Store trait: the abstract interface for local chat persistence.
//!
//! This trait allows the engine to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use murmur_core::{ChatRoom, Comment, CommentId, RoomId, UniqueId};

use crate::error::Result;

/// Lookup key for a stored comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommentKey {
    /// Server-assigned id.
    Id(CommentId),
    /// Client idempotency key.
    Unique(UniqueId),
}

impl From<CommentId> for CommentKey {
    fn from(id: CommentId) -> Self {
        CommentKey::Id(id)
    }
}

impl From<UniqueId> for CommentKey {
    fn from(unique_id: UniqueId) -> Self {
        CommentKey::Unique(unique_id)
    }
}

/// The Store trait: async interface for comment, room and attachment
/// persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Upsert by unique id**: `add_or_update` replaces the record with the
///   same `unique_id`. Merging is the caller's job; the store stores what it
///   is given.
/// - **No read-modify-write**: callers that need one hold a per-room lock.
/// - **Misses are not errors**: lookups return `Ok(None)`.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Comment Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a comment by server id or unique id.
    async fn get_comment(&self, key: &CommentKey) -> Result<Option<Comment>>;

    /// Get the live (not hard-deleted) comment whose `before_id` is `id`.
    ///
    /// This is the successor of `id` in its room chain.
    async fn get_comment_by_before_id(&self, id: CommentId) -> Result<Option<Comment>>;

    /// Insert a comment, or replace the stored comment with the same unique id.
    async fn add_or_update(&self, comment: &Comment) -> Result<()>;

    /// Get the most recent acknowledged comment, in one room or across all
    /// rooms.
    ///
    /// Ordered by timestamp, then id. Pending comments have no id and are
    /// never returned.
    async fn get_latest_comment(&self, room_id: Option<RoomId>) -> Result<Option<Comment>>;

    /// Get every stored comment of a room, oldest first.
    async fn get_comments(&self, room_id: RoomId) -> Result<Vec<Comment>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Room Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a room by id.
    async fn get_chat_room(&self, room_id: RoomId) -> Result<Option<ChatRoom>>;

    /// Insert or replace a room.
    async fn add_or_update_room(&self, room: &ChatRoom) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Local Attachment Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Record the local file path of a comment's downloaded attachment.
    async fn set_local_attachment(&self, id: CommentId, path: PathBuf) -> Result<()>;

    /// Get the local file path of a comment's attachment, if any.
    async fn get_local_attachment(&self, id: CommentId) -> Result<Option<PathBuf>>;

    /// Forget a comment's local attachment. Returns `true` if one existed.
    async fn delete_local_attachment(&self, id: CommentId) -> Result<bool>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// The visible timeline of a room, newest first.
    ///
    /// Walks the `before_id` chain from the newest live comment. Hard-deleted
    /// comments are stepped over, so a pointer that still targets one
    /// continues at that comment's predecessor. Pending comments are not part
    /// of the chain and are not returned.
    fn timeline(
        &self,
        room_id: RoomId,
    ) -> impl std::future::Future<Output = Result<Vec<Comment>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn timeline(&self, room_id: RoomId) -> Result<Vec<Comment>> {
        let comments = self.get_comments(room_id).await?;
        Ok(walk_chain(comments))
    }
}

/// Order a room's comments by following `before_id` from the newest live one.
fn walk_chain(comments: Vec<Comment>) -> Vec<Comment> {
    let head = comments
        .iter()
        .filter(|c| c.is_live() && c.id.is_some())
        .max_by_key(|c| (c.timestamp, c.id))
        .and_then(|c| c.id);

    let by_id: HashMap<CommentId, Comment> = comments
        .into_iter()
        .filter_map(|c| c.id.map(|id| (id, c)))
        .collect();

    let mut ordered = Vec::new();
    let mut visited = HashSet::new();
    let mut cursor = head;

    while let Some(id) = cursor {
        // A corrupted chain must not loop forever.
        if !visited.insert(id) {
            break;
        }
        let Some(comment) = by_id.get(&id) else {
            break;
        };
        if comment.is_live() {
            ordered.push(comment.clone());
        }
        cursor = comment.before_id;
    }

    ordered
}
