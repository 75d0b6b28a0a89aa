//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use murmur::{ChatClient, ClientConfig};
use murmur_core::{
    Account, Comment, CommentBuilder, CommentId, CommentRecord, CommentState, ReceiptPayload,
    RoomEventKind, RoomId, Topic, TopicId, UniqueId, UserId,
};
use murmur_store::{MemoryStore, Store};
use murmur_sync::{MemoryApi, MemoryBroker, Publish, QoS, RetryPolicy, SessionConfig};

/// The peer most fixture comments come from.
pub const PEER: &str = "bob@example.com";

/// An account wired to in-memory store, broker and API.
pub struct TestFixture {
    pub account: Account,
    pub store: Arc<MemoryStore>,
    pub api: Arc<MemoryApi>,
    pub broker: Arc<MemoryBroker>,
}

impl TestFixture {
    /// Create a fixture for `alice@example.com`.
    pub fn new() -> Self {
        Self::with_account(Account::new("alice@example.com", "Alice", "alice-token"))
    }

    pub fn with_account(account: Account) -> Self {
        Self {
            account,
            store: Arc::new(MemoryStore::new()),
            api: Arc::new(MemoryApi::new()),
            broker: MemoryBroker::new(),
        }
    }

    /// Another account on the same broker and server, with its own store.
    pub fn peer(&self, user: &str) -> Self {
        Self {
            account: Account::new(user, user, format!("{user}-token")),
            store: Arc::new(MemoryStore::new()),
            api: Arc::clone(&self.api),
            broker: Arc::clone(&self.broker),
        }
    }

    /// The broker client id used by [`TestFixture::client`].
    pub fn client_id(&self) -> String {
        format!("{}-device", self.account.user_id)
    }

    /// Config with a fixed client id and fast reconnects.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            session: SessionConfig {
                client_id: Some(self.client_id()),
                retry: RetryPolicy::new(5, 20),
                ..SessionConfig::default()
            },
            ..ClientConfig::default()
        }
    }

    /// A client over this fixture's store, API and broker.
    pub fn client(&self) -> ChatClient<MemoryStore, MemoryApi> {
        ChatClient::with_shared(
            self.account.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.api),
            Arc::new(self.broker.client()),
            self.config(),
        )
    }

    /// An acknowledged comment from [`PEER`].
    pub fn comment(&self, room_id: RoomId, id: u64, before: Option<u64>) -> Comment {
        CommentBuilder::new(room_id, PEER)
            .id(id)
            .unique_id(format!("u-{id}"))
            .before(before.unwrap_or(0))
            .message(format!("message {id}"))
            .sender_name("Bob")
            .state(CommentState::Sent)
            .build()
    }

    /// Comments `1..=len` of a room, each pointing at the previous one.
    pub fn chain(&self, room_id: RoomId, len: u64) -> Vec<Comment> {
        (1..=len)
            .map(|id| self.comment(room_id, id, (id > 1).then(|| id - 1)))
            .collect()
    }

    /// Store comments directly, bypassing the engine.
    pub async fn seed(&self, comments: &[Comment]) {
        for comment in comments {
            self.store
                .add_or_update(comment)
                .await
                .expect("seed comment");
        }
    }

    pub async fn stored(&self, id: u64) -> Option<Comment> {
        self.store
            .get_comment(&CommentId(id).into())
            .await
            .expect("read comment")
    }

    /// Poll the store until comment `id` shows up, for at most two seconds.
    pub async fn wait_for_comment(&self, id: u64) -> Option<Comment> {
        for _ in 0..400 {
            if let Some(comment) = self.stored(id).await {
                return Some(comment);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    /// A frame on this account's private new-comment channel.
    pub fn comment_frame(&self, comment: &Comment) -> Publish {
        let payload = serde_json::to_vec(&CommentRecord::from_comment(comment))
            .expect("encode comment record");
        Publish::new(
            format!("{}/c", self.account.token),
            payload,
            QoS::AtLeastOnce,
            false,
        )
    }

    /// A delivery or read receipt frame sent by `user`.
    pub fn receipt_frame(
        &self,
        room_id: RoomId,
        user: &str,
        state: CommentState,
        comment_id: u64,
        unique_id: &str,
    ) -> Publish {
        let kind = if state == CommentState::Read {
            RoomEventKind::Read
        } else {
            RoomEventKind::Delivered
        };
        let topic = Topic::Room {
            room_id,
            topic_id: TopicId(room_id.get()),
            user: UserId::from(user),
            kind,
        };
        let payload =
            ReceiptPayload::new(CommentId(comment_id), UniqueId::from(unique_id)).encode();
        Publish::new(topic.to_string(), payload, QoS::AtLeastOnce, true)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `check` until it holds, for at most two seconds.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_sync::InboundEvent;

    #[test]
    fn test_chain_links() {
        let fixture = TestFixture::new();
        let chain = fixture.chain(RoomId(1), 3);
        assert_eq!(chain[0].before_id, None);
        assert_eq!(chain[2].before_id, Some(CommentId(2)));
    }

    #[test]
    fn test_frames_decode() {
        let fixture = TestFixture::new();
        let comment = fixture.comment(RoomId(1), 7, Some(6));
        let event = InboundEvent::decode(&fixture.comment_frame(&comment)).unwrap();
        assert!(matches!(event, InboundEvent::NewComment(c) if c.id == Some(CommentId(7))));

        let receipt = fixture.receipt_frame(RoomId(1), PEER, CommentState::Read, 7, "u-7");
        assert_eq!(receipt.topic, "room/1/1/bob@example.com/r");
        assert!(matches!(
            InboundEvent::decode(&receipt).unwrap(),
            InboundEvent::Receipt { state: CommentState::Read, .. }
        ));
    }

    #[tokio::test]
    async fn test_peer_shares_broker() {
        let fixture = TestFixture::new();
        let peer = fixture.peer("carol@example.com");
        assert!(Arc::ptr_eq(&fixture.broker, &peer.broker));
        fixture.seed(&fixture.chain(RoomId(1), 2)).await;
        assert!(fixture.stored(2).await.is_some());
        assert!(peer.stored(2).await.is_none());
    }
}
