//! Push and pull channels against the in-memory broker and API.

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use tokio::time::timeout;

use murmur::core::{
    new_comment_topic, room_filter, user_status_topic, CommentId, CommentState, ReceiptPayload,
    RoomEventKind, RoomId, UniqueId, UserId,
};
use murmur::store::{CommentKey, MemoryStore, Store};
use murmur::{ChatEvent, CommentStateMachine, EventStream, ReceiptOutcome, RoomLocks};
use murmur_testkit::fixtures::PEER;
use murmur_testkit::generators::receipt_sequence;
use murmur_testkit::{wait_until, TestFixture};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn next_event(events: &mut EventStream) -> ChatEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

type Client = murmur::ChatClient<MemoryStore, murmur::sync::MemoryApi>;

/// Wait until the session is connected and its subscriptions are restored.
async fn wait_connected(client: &Client) {
    assert!(
        wait_until(|| client.session().is_connected()).await,
        "client never connected"
    );
}

#[tokio::test]
async fn test_push_then_pull_converges_with_pull_then_push() {
    init_tracing();
    let comments = TestFixture::new().chain(RoomId(1), 3);

    // Push first, then catch up.
    let push_first = TestFixture::new();
    let client = push_first.client();
    client.start().await.unwrap();
    wait_connected(&client).await;
    for comment in &comments {
        push_first.broker.inject(push_first.comment_frame(comment)).await;
        push_first.api.push(comment).await;
    }
    assert!(push_first.wait_for_comment(3).await.is_some());
    client.catch_up().fetch_after(RoomId(1), CommentId(0)).await;
    client.shutdown().await;

    // Catch up first, then push.
    let pull_first = TestFixture::new();
    for comment in &comments {
        pull_first.api.push(comment).await;
    }
    let client = pull_first.client();
    client.catch_up().fetch_after(RoomId(1), CommentId(0)).await;
    let mut events = client.subscribe();
    client.start().await.unwrap();
    wait_connected(&client).await;
    for comment in &comments {
        pull_first.broker.inject(pull_first.comment_frame(comment)).await;
    }
    for _ in &comments {
        next_event(&mut events).await;
    }
    client.shutdown().await;

    let pushed = push_first.store.get_comments(RoomId(1)).await.unwrap();
    let pulled = pull_first.store.get_comments(RoomId(1)).await.unwrap();
    assert_eq!(pushed.len(), 3);
    assert_eq!(pushed, pulled);
}

#[tokio::test]
async fn test_comment_from_peer_is_acknowledged_and_emitted() {
    init_tracing();
    let fixture = TestFixture::new();
    let client = fixture.client();
    let mut events = client.subscribe();
    client.start().await.unwrap();
    wait_connected(&client).await;

    let comment = fixture.comment(RoomId(4), 10, None);
    fixture.broker.inject(fixture.comment_frame(&comment)).await;

    match next_event(&mut events).await {
        ChatEvent::CommentReceived(received) => {
            assert_eq!(received.unique_id, comment.unique_id);
            assert_eq!(received.sender_email, UserId::from(PEER));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let receipt_topic = format!("room/4/4/{}/d", fixture.account.user_id);
    let receipt = fixture.broker.retained(&receipt_topic).await.unwrap();
    assert_eq!(&receipt.payload[..], b"10:u-10");
    client.shutdown().await;
}

#[tokio::test]
async fn test_own_comment_is_not_acknowledged_or_emitted() {
    init_tracing();
    let fixture = TestFixture::new();
    let client = fixture.client();
    let mut events = client.subscribe();
    client.start().await.unwrap();
    wait_connected(&client).await;

    let mut own = fixture.comment(RoomId(4), 11, None);
    own.sender_email = fixture.account.user_id.clone();
    fixture.broker.inject(fixture.comment_frame(&own)).await;

    assert!(fixture.wait_for_comment(11).await.is_some());
    assert!(events.try_recv().is_err());
    assert!(fixture
        .broker
        .published()
        .await
        .iter()
        .all(|p| !p.topic.ends_with("/d")));
    client.shutdown().await;
}

#[tokio::test]
async fn test_read_receipt_advances_own_comment() {
    init_tracing();
    let fixture = TestFixture::new();
    let client = fixture.client();
    let mut events = client.subscribe();
    client.start().await.unwrap();
    client.listen_room(RoomId(1)).await.unwrap();
    wait_connected(&client).await;

    let pending = client
        .compose_comment(RoomId(1), murmur::TopicId(1), "hello")
        .await
        .unwrap();
    let mut confirmed = pending.clone();
    confirmed.id = Some(CommentId(20));
    confirmed.state = CommentState::Sent;
    client.comments().apply_comment(confirmed).await.unwrap();

    let unique = pending.unique_id.as_str().to_string();
    let frame = fixture.receipt_frame(RoomId(1), PEER, CommentState::Read, 20, &unique);
    fixture.broker.inject(frame).await;

    match next_event(&mut events).await {
        ChatEvent::RoomState {
            state, comment_id, ..
        } => {
            assert_eq!(state, CommentState::Read);
            assert_eq!(comment_id, CommentId(20));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    let stored = fixture.stored(20).await.unwrap();
    assert_eq!(stored.state, CommentState::Read);
    client.shutdown().await;
}

#[tokio::test]
async fn test_resume_skips_stale_checkpoint() {
    init_tracing();
    let fixture = TestFixture::new();
    let mut old = fixture.comment(RoomId(1), 1, None);
    old.timestamp = Utc::now() - chrono::Duration::days(3);
    fixture.seed(&[old]).await;
    fixture.api.push(&fixture.comment(RoomId(1), 2, Some(1))).await;

    let client = fixture.client();
    assert!(client.catch_up().resume(RoomId(1)).await.is_empty());
    assert!(client.catch_up().sync_all().await.is_empty());
    assert!(fixture.api.calls().await.is_empty());
    assert!(fixture.stored(2).await.is_none());
}

#[tokio::test]
async fn test_resume_from_today_fills_gap() {
    init_tracing();
    let fixture = TestFixture::new();
    let chain = fixture.chain(RoomId(1), 4);
    fixture.seed(&chain[..2]).await;
    for comment in &chain {
        fixture.api.push(comment).await;
    }

    let client = fixture.client();
    let fetched = client.catch_up().resume(RoomId(1)).await;
    assert_eq!(fetched.len(), 2);
    assert!(fixture.stored(4).await.is_some());
}

#[tokio::test]
async fn test_reconnect_restores_presence_and_subscriptions() {
    init_tracing();
    let fixture = TestFixture::new();
    let client = fixture.client();
    client.start().await.unwrap();
    client.listen_room(RoomId(5)).await.unwrap();
    client.listen_user_status(&UserId::from(PEER)).await.unwrap();
    wait_connected(&client).await;

    let client_id = fixture.client_id();
    let own_status = user_status_topic(&fixture.account.user_id);
    fixture.broker.drop_connection(&client_id).await;

    // The last will announces us offline.
    assert!(fixture
        .broker
        .published()
        .await
        .iter()
        .any(|p| p.topic == own_status && p.payload.starts_with(b"0:")));

    let (broker, status) = (&fixture.broker, &own_status);
    assert!(
        wait_until(|| async move {
            broker
                .retained(status)
                .await
                .is_some_and(|p| p.payload.starts_with(b"1:"))
        })
        .await
    );
    wait_connected(&client).await;
    assert!(fixture.broker.is_online(&client_id).await);

    let subscriptions = fixture.broker.subscriptions(&client_id).await;
    assert!(subscriptions.contains(&new_comment_topic(&fixture.account.token)));
    for kind in RoomEventKind::ALL {
        assert!(subscriptions.contains(&room_filter(RoomId(5), kind)));
    }
    assert!(subscriptions.contains(&user_status_topic(&UserId::from(PEER))));
    client.shutdown().await;
}

#[tokio::test]
async fn test_logout_publishes_offline_without_will() {
    init_tracing();
    let fixture = TestFixture::new();
    let client = fixture.client();
    client.start().await.unwrap();
    wait_connected(&client).await;

    client.logout().await;

    let own_status = user_status_topic(&fixture.account.user_id);
    let status = fixture.broker.retained(&own_status).await.unwrap();
    assert!(status.payload.starts_with(b"0:"));
    assert!(!fixture.broker.is_online(&fixture.client_id()).await);
    assert!(!client.session().is_connected().await);

    let offline = fixture
        .broker
        .published()
        .await
        .iter()
        .filter(|p| p.topic == own_status && p.payload.starts_with(b"0:"))
        .count();
    assert_eq!(offline, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_receipts_are_idempotent_and_monotonic(receipts in receipt_sequence(12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let fixture = TestFixture::new();
            let locks = std::sync::Arc::new(RoomLocks::new());
            let machine = CommentStateMachine::new(fixture.store.clone(), locks);
            machine.apply_comment(fixture.comment(RoomId(1), 1, None)).await.unwrap();

            let payload = ReceiptPayload::new(CommentId(1), UniqueId::from("u-1"));
            let peer = UserId::from(PEER);
            let mut expected = CommentState::Sent;

            for state in &receipts {
                let outcome = machine
                    .apply_receipt(RoomId(1), &peer, *state, &payload)
                    .await
                    .unwrap();
                assert_eq!(outcome == ReceiptOutcome::Advanced, *state > expected);
                expected = expected.max(*state);
            }
            let once = get(&fixture.store, 1).await;
            assert_eq!(once.state, expected);

            for state in &receipts {
                let outcome = machine
                    .apply_receipt(RoomId(1), &peer, *state, &payload)
                    .await
                    .unwrap();
                assert_ne!(outcome, ReceiptOutcome::Advanced);
            }
            assert_eq!(get(&fixture.store, 1).await, once);
        });
    }
}

async fn get(store: &MemoryStore, id: u64) -> murmur::Comment {
    store
        .get_comment(&CommentKey::Id(CommentId(id)))
        .await
        .unwrap()
        .unwrap()
}
