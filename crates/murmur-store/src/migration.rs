//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated store schema");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Comments, keyed by the client idempotency key
        CREATE TABLE comments (
            unique_id TEXT PRIMARY KEY,
            comment_id INTEGER,               -- server id, NULL until acknowledged
            room_id INTEGER NOT NULL,
            topic_id INTEGER NOT NULL,
            before_id INTEGER,                -- previous comment in the room chain
            message TEXT NOT NULL,
            raw_type TEXT NOT NULL,
            payload TEXT,                     -- JSON
            extras TEXT,                      -- JSON
            sender_email TEXT NOT NULL,
            sender_name TEXT,
            sender_avatar TEXT,
            timestamp_ns INTEGER NOT NULL,    -- UTC, nanoseconds since epoch
            state TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            hard_deleted INTEGER NOT NULL DEFAULT 0,
            room_name TEXT,
            room_avatar TEXT,
            group_message INTEGER NOT NULL DEFAULT 0
        );

        -- Room metadata; members are a JSON array
        CREATE TABLE rooms (
            room_id INTEGER PRIMARY KEY,
            unique_id TEXT NOT NULL,
            name TEXT NOT NULL,
            avatar_url TEXT,
            is_group INTEGER NOT NULL DEFAULT 0,
            members TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Downloaded attachment files
        CREATE TABLE local_attachments (
            comment_id INTEGER PRIMARY KEY,
            path TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_comments_comment_id ON comments(comment_id);
        CREATE INDEX idx_comments_before_id ON comments(before_id);
        CREATE INDEX idx_comments_room_time ON comments(room_id, timestamp_ns);
        "#,
    )?;

    Ok(())
}
