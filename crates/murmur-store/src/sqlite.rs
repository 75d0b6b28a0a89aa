//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for Murmur. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use murmur_core::{
    from_unix_nanos, to_unix_nanos, ChatRoom, Comment, CommentId, CommentState, RoomId, TopicId,
    UniqueId, UserId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{CommentKey, Store};

const COMMENT_COLUMNS: &str = "unique_id, comment_id, room_id, topic_id, before_id, message,
    raw_type, payload, extras, sender_email, sender_name, sender_avatar, timestamp_ns, state,
    deleted, hard_deleted, room_name, room_avatar, group_message";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn to_sql_id(id: u64) -> i64 {
    id as i64
}

fn json_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn encode_json(value: &Option<Value>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

// Helper to convert a row to Comment
fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    let unique_id: String = row.get(0)?;
    let comment_id: Option<i64> = row.get(1)?;
    let room_id: i64 = row.get(2)?;
    let topic_id: i64 = row.get(3)?;
    let before_id: Option<i64> = row.get(4)?;
    let timestamp_ns: i64 = row.get(12)?;
    let state: String = row.get(13)?;

    let timestamp = from_unix_nanos(timestamp_ns).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(12, "timestamp_ns".into(), Type::Integer)
    })?;
    let state = CommentState::parse(&state)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(13, "state".into(), Type::Text))?;

    Ok(Comment {
        id: comment_id.map(|id| CommentId(id as u64)),
        unique_id: UniqueId::from(unique_id),
        room_id: RoomId(room_id as u64),
        topic_id: TopicId(topic_id as u64),
        before_id: before_id.map(|id| CommentId(id as u64)),
        message: row.get(5)?,
        raw_type: row.get(6)?,
        payload: json_column(row, 7)?,
        extras: json_column(row, 8)?,
        sender_email: UserId::from(row.get::<_, String>(9)?),
        sender_name: row.get(10)?,
        sender_avatar: row.get(11)?,
        timestamp,
        state,
        deleted: row.get(14)?,
        hard_deleted: row.get(15)?,
        room_name: row.get(16)?,
        room_avatar: row.get(17)?,
        group_message: row.get(18)?,
    })
}

// Helper to convert a row to ChatRoom
fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRoom> {
    let room_id: i64 = row.get(0)?;
    let members: String = row.get(5)?;
    let members = serde_json::from_str(&members)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(ChatRoom {
        id: RoomId(room_id as u64),
        unique_id: row.get(1)?,
        name: row.get(2)?,
        avatar_url: row.get(3)?,
        is_group: row.get(4)?,
        members,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_comment(&self, key: &CommentKey) -> Result<Option<Comment>> {
        let key = key.clone();

        self.blocking(move |conn| {
            let comment = match key {
                CommentKey::Unique(unique_id) => conn
                    .query_row(
                        &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE unique_id = ?1"),
                        params![unique_id.as_str()],
                        row_to_comment,
                    )
                    .optional()?,
                CommentKey::Id(id) => conn
                    .query_row(
                        &format!(
                            "SELECT {COMMENT_COLUMNS} FROM comments WHERE comment_id = ?1 LIMIT 1"
                        ),
                        params![to_sql_id(id.get())],
                        row_to_comment,
                    )
                    .optional()?,
            };
            Ok(comment)
        })
        .await
    }

    async fn get_comment_by_before_id(&self, id: CommentId) -> Result<Option<Comment>> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments
                     WHERE before_id = ?1 AND hard_deleted = 0
                     ORDER BY timestamp_ns, comment_id LIMIT 1"
                ),
                params![to_sql_id(id.get())],
                row_to_comment,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn add_or_update(&self, comment: &Comment) -> Result<()> {
        let comment = comment.clone();

        self.blocking(move |conn| {
            let payload = encode_json(&comment.payload)?;
            let extras = encode_json(&comment.extras)?;
            let timestamp_ns = to_unix_nanos(&comment.timestamp).ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "timestamp of {} out of range: {}",
                    comment.unique_id, comment.timestamp
                ))
            })?;

            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO comments ({COMMENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18, ?19)"
                ),
                params![
                    comment.unique_id.as_str(),
                    comment.id.map(|id| to_sql_id(id.get())),
                    to_sql_id(comment.room_id.get()),
                    to_sql_id(comment.topic_id.get()),
                    comment.before_id.map(|id| to_sql_id(id.get())),
                    comment.message,
                    comment.raw_type,
                    payload,
                    extras,
                    comment.sender_email.as_str(),
                    comment.sender_name,
                    comment.sender_avatar,
                    timestamp_ns,
                    comment.state.as_str(),
                    comment.deleted,
                    comment.hard_deleted,
                    comment.room_name,
                    comment.room_avatar,
                    comment.group_message,
                ],
            )?;

            Ok(())
        })
        .await
    }

    async fn get_latest_comment(&self, room_id: Option<RoomId>) -> Result<Option<Comment>> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments
                     WHERE comment_id IS NOT NULL AND (?1 IS NULL OR room_id = ?1)
                     ORDER BY timestamp_ns DESC, comment_id DESC LIMIT 1"
                ),
                params![room_id.map(|r| to_sql_id(r.get()))],
                row_to_comment,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_comments(&self, room_id: RoomId) -> Result<Vec<Comment>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments WHERE room_id = ?1
                 ORDER BY timestamp_ns, comment_id, unique_id"
            ))?;

            let comments = stmt
                .query_map(params![to_sql_id(room_id.get())], row_to_comment)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(comments)
        })
        .await
    }

    async fn get_chat_room(&self, room_id: RoomId) -> Result<Option<ChatRoom>> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT room_id, unique_id, name, avatar_url, is_group, members
                 FROM rooms WHERE room_id = ?1",
                params![to_sql_id(room_id.get())],
                row_to_room,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn add_or_update_room(&self, room: &ChatRoom) -> Result<()> {
        let room = room.clone();

        self.blocking(move |conn| {
            let members = serde_json::to_string(&room.members)?;

            conn.execute(
                "INSERT INTO rooms (room_id, unique_id, name, avatar_url, is_group, members, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(room_id) DO UPDATE SET
                    unique_id = excluded.unique_id,
                    name = excluded.name,
                    avatar_url = excluded.avatar_url,
                    is_group = excluded.is_group,
                    members = excluded.members,
                    updated_at = excluded.updated_at",
                params![
                    to_sql_id(room.id.get()),
                    room.unique_id,
                    room.name,
                    room.avatar_url,
                    room.is_group,
                    members,
                    chrono::Utc::now().timestamp_millis(),
                ],
            )?;

            Ok(())
        })
        .await
    }

    async fn set_local_attachment(&self, id: CommentId, path: PathBuf) -> Result<()> {
        self.blocking(move |conn| {
            let path = path.to_str().ok_or_else(|| {
                StoreError::InvalidData(format!("attachment path is not UTF-8: {}", path.display()))
            })?;

            conn.execute(
                "INSERT OR REPLACE INTO local_attachments (comment_id, path, created_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    to_sql_id(id.get()),
                    path,
                    chrono::Utc::now().timestamp_millis()
                ],
            )?;

            Ok(())
        })
        .await
    }

    async fn get_local_attachment(&self, id: CommentId) -> Result<Option<PathBuf>> {
        self.blocking(move |conn| {
            let path: Option<String> = conn
                .query_row(
                    "SELECT path FROM local_attachments WHERE comment_id = ?1",
                    params![to_sql_id(id.get())],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(path.map(PathBuf::from))
        })
        .await
    }

    async fn delete_local_attachment(&self, id: CommentId) -> Result<bool> {
        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM local_attachments WHERE comment_id = ?1",
                params![to_sql_id(id.get())],
            )?;

            Ok(removed > 0)
        })
        .await
    }
}
