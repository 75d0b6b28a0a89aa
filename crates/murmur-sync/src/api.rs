//! REST catch-up API abstraction.
//!
//! Endpoints return raw comment records so that callers can parse each one
//! independently and skip only the malformed ones.

use async_trait::async_trait;
use serde_json::Value;

use murmur_core::{CommentId, RoomId, UniqueId};

use crate::error::SyncError;

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Fetch direction relative to a comment id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Older comments ending at the given id.
    Before,
    /// Newer comments after the given id.
    After,
}

/// The server's comment endpoints.
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Comments of one room around `last_comment_id`.
    async fn load_comments(
        &self,
        room_id: RoomId,
        last_comment_id: CommentId,
        direction: Direction,
    ) -> Result<Vec<Value>>;

    /// Every comment across all rooms newer than `last_received_comment_id`.
    async fn sync(&self, last_received_comment_id: CommentId) -> Result<Vec<Value>>;

    /// Delete comments for everyone. Returns the affected records.
    async fn delete_comments(&self, unique_ids: &[UniqueId], hard: bool) -> Result<Vec<Value>>;
}

/// An in-memory API server for testing.
pub mod memory {
    use super::*;
    use tokio::sync::Mutex;

    use murmur_core::{Comment, CommentRecord};

    /// A recorded API call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ApiCall {
        LoadComments {
            room_id: RoomId,
            last_comment_id: CommentId,
            direction: Direction,
        },
        Sync {
            last_received_comment_id: CommentId,
        },
        Delete {
            unique_ids: Vec<UniqueId>,
            hard: bool,
        },
    }

    #[derive(Default)]
    struct ApiState {
        records: Vec<Value>,
        calls: Vec<ApiCall>,
        failing: bool,
    }

    fn field(record: &Value, key: &str) -> Option<u64> {
        record.get(key).and_then(Value::as_u64)
    }

    /// In-memory API implementation.
    #[derive(Default)]
    pub struct MemoryApi {
        state: Mutex<ApiState>,
    }

    impl MemoryApi {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a comment as the server would serve it.
        pub async fn push(&self, comment: &Comment) {
            let record = CommentRecord::from_comment(comment);
            let value = serde_json::to_value(record).unwrap_or(Value::Null);
            self.push_raw(value).await;
        }

        /// Add a raw record, possibly malformed.
        pub async fn push_raw(&self, record: Value) {
            self.state.lock().await.records.push(record);
        }

        /// Make every call fail (or succeed again).
        pub async fn set_failing(&self, failing: bool) {
            self.state.lock().await.failing = failing;
        }

        /// Calls received so far.
        pub async fn calls(&self) -> Vec<ApiCall> {
            self.state.lock().await.calls.clone()
        }
    }

    impl ApiState {
        fn check(&mut self, call: ApiCall) -> Result<()> {
            self.calls.push(call);
            if self.failing {
                return Err(SyncError::Unavailable("memory api is failing".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SyncApi for MemoryApi {
        async fn load_comments(
            &self,
            room_id: RoomId,
            last_comment_id: CommentId,
            direction: Direction,
        ) -> Result<Vec<Value>> {
            let mut state = self.state.lock().await;
            state.check(ApiCall::LoadComments {
                room_id,
                last_comment_id,
                direction,
            })?;

            let last = last_comment_id.get();
            let mut records: Vec<Value> = state
                .records
                .iter()
                .filter(|r| field(r, "room_id") == Some(room_id.get()))
                .filter(|r| match (direction, field(r, "id")) {
                    (Direction::Before, Some(id)) => id < last,
                    (Direction::After, Some(id)) => id > last,
                    // Records without an id are malformed; serve them so the
                    // client has to cope.
                    (_, None) => true,
                })
                .cloned()
                .collect();
            records.sort_by_key(|r| field(r, "id").unwrap_or(0));
            if direction == Direction::Before {
                records.reverse();
            }
            Ok(records)
        }

        async fn sync(&self, last_received_comment_id: CommentId) -> Result<Vec<Value>> {
            let mut state = self.state.lock().await;
            state.check(ApiCall::Sync {
                last_received_comment_id,
            })?;

            let mut records: Vec<Value> = state
                .records
                .iter()
                .filter(|r| field(r, "id").map_or(true, |id| id > last_received_comment_id.get()))
                .cloned()
                .collect();
            records.sort_by_key(|r| field(r, "id").unwrap_or(0));
            Ok(records)
        }

        async fn delete_comments(
            &self,
            unique_ids: &[UniqueId],
            hard: bool,
        ) -> Result<Vec<Value>> {
            let mut state = self.state.lock().await;
            state.check(ApiCall::Delete {
                unique_ids: unique_ids.to_vec(),
                hard,
            })?;

            let mut affected = Vec::new();
            for record in state.records.iter_mut() {
                let matches = record
                    .get("unique_temp_id")
                    .and_then(Value::as_str)
                    .is_some_and(|u| unique_ids.iter().any(|id| id.as_str() == u));
                if matches {
                    record["is_deleted"] = Value::Bool(true);
                    affected.push(record.clone());
                }
            }
            Ok(affected)
        }
    }
}
