//! # Murmur Store
//!
//! Local persistence for Murmur. Provides a trait-based interface for
//! comments, rooms and downloaded attachments with SQLite and in-memory
//! implementations.
//!
//! ## Overview
//!
//! The engine only ever talks to the [`Store`] trait. The primary
//! implementation is [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`StoreExt`] - Derived queries such as the visible room timeline
//! - [`CommentKey`] - Lookup by server id or client unique id
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use murmur_store::{CommentKey, SqliteStore, Store};
//! use murmur_core::CommentId;
//!
//! async fn example() -> murmur_store::Result<()> {
//!     let store = SqliteStore::open("murmur.db")?;
//!     let comment = store.get_comment(&CommentKey::Id(CommentId(42))).await?;
//!     println!("{comment:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Upsert by unique id**: the client idempotency key is the primary key
//! - **Successor lookups ignore hard-deleted comments**
//! - **No merging in the store**: the state machine owns merge rules

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CommentKey, Store, StoreExt};
