//! # Murmur
//!
//! The chat synchronization engine: keeps a local comment store consistent
//! with the server while messages arrive over two channels at once.
//!
//! ## Overview
//!
//! - **Push**: a persistent broker session delivers new comments, typing,
//!   receipts and presence in real time.
//! - **Pull**: REST catch-up fills gaps after reconnects and pages history.
//! - **Delete**: server-confirmed deletions are reconciled into the store,
//!   repairing the room chain on hard deletes.
//!
//! Both channels feed one write path, so a comment seen twice (push then
//! pull, or the reverse) ends up as the same stored record.
//!
//! ## Key Concepts
//!
//! - **Comment**: identified by a client `unique_id` and, once acknowledged,
//!   a server `id`. Rooms are chains of comments linked by `before_id`.
//! - **State**: `Failed < Pending < Sending < Sent < Delivered < Read`. Never moves
//!   backward.
//! - **Redaction**: soft deletes replace content; hard deletes also unlink
//!   the comment from the chain. Both are sticky.
//! - **Room lock**: every store read-modify-write holds the room's lock.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use murmur::{ChatClient, ChatEvent, ClientConfig};
//! use murmur::core::{Account, RoomId};
//! use murmur::store::SqliteStore;
//! use murmur::sync::{HttpSyncApi, MqttBroker, MqttConfig};
//!
//! async fn example() -> murmur::Result<()> {
//!     let account = Account::new("alice@example.com", "Alice", "token");
//!     let store = SqliteStore::open("murmur.db")?;
//!     let api = HttpSyncApi::new("https://chat.example.com", "token");
//!     let broker = MqttBroker::new(MqttConfig::new("mqtt.example.com", 1883));
//!
//!     let config = ClientConfig::default();
//!     let client = ChatClient::new(account, store, api, Arc::new(broker), config);
//!     let mut events = client.subscribe();
//!     client.start().await?;
//!     client.listen_room(RoomId(42)).await?;
//!     client.catch_up().resume(RoomId(42)).await;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ChatEvent::CommentReceived(comment) = event {
//!             println!("{}: {}", comment.sender_email, comment.message);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `murmur::core` - Comment model, identifiers, topic grammar, payloads
//! - `murmur::store` - Store trait, SQLite and in-memory stores
//! - `murmur::sync` - Broker session and REST API

pub mod catchup;
pub mod client;
pub mod config;
pub mod delete;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod locks;
pub mod state_machine;

// Re-export component crates
pub use murmur_core as core;
pub use murmur_store as store;
pub use murmur_sync as sync;

// Re-export main types for convenience
pub use catchup::CatchUp;
pub use client::ChatClient;
pub use config::{CatchUpConfig, ClientConfig, EventConfig};
pub use delete::{DeleteBatch, DeleteReconciler, DeleteReport, DeleteTarget};
pub use dispatcher::Dispatcher;
pub use error::{ClientError, Result};
pub use listener::{ChatEvent, DeleteCommentListener, EventHub, EventStream};
pub use locks::RoomLocks;
pub use state_machine::{ApplyOutcome, CommentStateMachine, ReceiptOutcome};

// Re-export commonly used core types
pub use murmur_core::{
    Account, ChatRoom, Comment, CommentBuilder, CommentId, CommentState, RoomId, TopicId,
    UniqueId, UserId,
};
