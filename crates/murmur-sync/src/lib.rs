//! # Murmur Sync
//!
//! The I/O boundary of Murmur: the push channel (broker session) and the
//! pull channel (REST catch-up).
//!
//! ## Overview
//!
//! - [`TransportSession`] keeps one persistent broker connection per user,
//!   restores presence and subscriptions after every reconnect, and hands
//!   inbound frames to the caller. [`MqttBroker`] connects it to an MQTT
//!   broker; [`MemoryBroker`] stands in for one in tests.
//! - [`InboundEvent`] decodes those frames into typed events.
//! - [`SyncApi`] fetches comment records for catch-up and deletion, with an
//!   HTTP implementation in [`HttpSyncApi`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use murmur_core::Account;
//! use murmur_sync::{InboundEvent, MemoryBroker, SessionConfig, TransportSession};
//!
//! async fn example() -> murmur_sync::Result<()> {
//!     let broker = MemoryBroker::new();
//!     let account = Account::new("alice@example.com", "Alice", "token");
//!     let config = SessionConfig::default();
//!     let session = TransportSession::new(Arc::new(broker.client()), account, config);
//!
//!     let mut frames = session.start().await?;
//!     while let Some(frame) = frames.recv().await {
//!         if let Ok(event) = InboundEvent::decode(&frame) {
//!             println!("{event:?}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Quality of Service
//!
//! | traffic            | QoS           | retained |
//! |--------------------|---------------|----------|
//! | typing             | at most once  | no       |
//! | delivery / read    | at least once | yes      |
//! | presence, will     | exactly once  | yes      |
//! | private channel    | at least once | -        |

pub mod api;
pub mod broker;
pub mod error;
pub mod event;
pub mod http;
pub mod mqtt;
pub mod retry;
pub mod session;

pub use api::{memory::ApiCall, memory::MemoryApi, Direction, SyncApi};
pub use broker::{
    memory::MemoryBroker, memory::MemoryBrokerClient, Broker, ConnectOptions, Publish, QoS,
};
pub use error::{Result, SyncError, TransportError};
pub use event::InboundEvent;
pub use http::HttpSyncApi;
pub use mqtt::{MqttBroker, MqttConfig};
pub use retry::RetryPolicy;
pub use session::{SessionConfig, TransportSession};
