//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use murmur_core::{ChatRoom, Comment, CommentId, RoomId, UniqueId};

use crate::error::{Result, StoreError};
use crate::traits::{CommentKey, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Comments indexed by unique id.
    comments: HashMap<UniqueId, Comment>,

    /// Server id index: comment_id -> unique_id.
    ids: HashMap<CommentId, UniqueId>,

    /// Rooms.
    rooms: HashMap<RoomId, ChatRoom>,

    /// Local attachment paths.
    attachments: HashMap<CommentId, PathBuf>,
}

impl MemoryStoreInner {
    fn lookup(&self, key: &CommentKey) -> Option<&Comment> {
        match key {
            CommentKey::Unique(unique_id) => self.comments.get(unique_id),
            CommentKey::Id(id) => self.ids.get(id).and_then(|u| self.comments.get(u)),
        }
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_comment(&self, key: &CommentKey) -> Result<Option<Comment>> {
        let inner = self.read()?;
        Ok(inner.lookup(key).cloned())
    }

    async fn get_comment_by_before_id(&self, id: CommentId) -> Result<Option<Comment>> {
        let inner = self.read()?;
        Ok(inner
            .comments
            .values()
            .filter(|c| c.is_live() && c.before_id == Some(id))
            .min_by_key(|c| (c.timestamp, c.id))
            .cloned())
    }

    async fn add_or_update(&self, comment: &Comment) -> Result<()> {
        let mut inner = self.write()?;

        // Drop a stale id mapping if this record's id changed.
        let previous_id = inner
            .comments
            .get(&comment.unique_id)
            .and_then(|existing| existing.id);
        if let Some(previous_id) = previous_id {
            if comment.id != Some(previous_id) {
                inner.ids.remove(&previous_id);
            }
        }

        if let Some(id) = comment.id {
            inner.ids.insert(id, comment.unique_id.clone());
        }
        inner
            .comments
            .insert(comment.unique_id.clone(), comment.clone());

        Ok(())
    }

    async fn get_latest_comment(&self, room_id: Option<RoomId>) -> Result<Option<Comment>> {
        let inner = self.read()?;
        Ok(inner
            .comments
            .values()
            .filter(|c| c.id.is_some())
            .filter(|c| room_id.map_or(true, |room| c.room_id == room))
            .max_by_key(|c| (c.timestamp, c.id))
            .cloned())
    }

    async fn get_comments(&self, room_id: RoomId) -> Result<Vec<Comment>> {
        let inner = self.read()?;
        let mut comments: Vec<Comment> = inner
            .comments
            .values()
            .filter(|c| c.room_id == room_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| {
            (a.timestamp, a.id, &a.unique_id).cmp(&(b.timestamp, b.id, &b.unique_id))
        });
        Ok(comments)
    }

    async fn get_chat_room(&self, room_id: RoomId) -> Result<Option<ChatRoom>> {
        let inner = self.read()?;
        Ok(inner.rooms.get(&room_id).cloned())
    }

    async fn add_or_update_room(&self, room: &ChatRoom) -> Result<()> {
        let mut inner = self.write()?;
        inner.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn set_local_attachment(&self, id: CommentId, path: PathBuf) -> Result<()> {
        let mut inner = self.write()?;
        inner.attachments.insert(id, path);
        Ok(())
    }

    async fn get_local_attachment(&self, id: CommentId) -> Result<Option<PathBuf>> {
        let inner = self.read()?;
        Ok(inner.attachments.get(&id).cloned())
    }

    async fn delete_local_attachment(&self, id: CommentId) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner.attachments.remove(&id).is_some())
    }
}
