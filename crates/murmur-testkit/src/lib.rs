//! # Murmur Testkit
//!
//! Testing utilities for Murmur.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an account wired to in-memory store, broker and API, plus
//!   helpers that build comments and broker frames
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use murmur_testkit::fixtures::TestFixture;
//! use murmur::core::RoomId;
//!
//! async fn example() {
//!     let fixture = TestFixture::new();
//!     let client = fixture.client();
//!     client.start().await.unwrap();
//!
//!     let comment = fixture.comment(RoomId(1), 1, None);
//!     fixture.broker.inject(fixture.comment_frame(&comment)).await;
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use murmur_testkit::generators::{comment_from_params, CommentParams};
//!
//! proptest! {
//!     #[test]
//!     fn comment_has_requested_id(params: CommentParams) {
//!         let comment = comment_from_params(&params);
//!         prop_assert_eq!(comment.id.map(|id| id.get()), Some(params.id));
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{wait_until, TestFixture};
pub use generators::{comment_from_params, CommentParams};
