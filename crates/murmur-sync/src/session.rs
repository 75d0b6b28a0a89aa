//! Transport session: one persistent broker connection per user.
//!
//! The session runs as a spawned task. It connects with backoff, restores
//! presence and subscriptions on every (re)connection, flushes publishes
//! buffered while offline, and forwards inbound frames over an `mpsc`
//! channel. Shutdown is signalled through a `watch` channel.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_core::{
    encode_typing, new_comment_topic, room_filter, user_status_topic, Account, CommentId,
    PresencePayload, ReceiptPayload, RoomEventKind, RoomId, Topic, TopicId, UniqueId, UserId,
};

use crate::broker::{Broker, ConnectOptions, Publish, QoS};
use crate::error::{Result, TransportError};
use crate::retry::RetryPolicy;

/// Configuration for the transport session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Broker client id; generated from the user id when absent.
    pub client_id: Option<String>,
    /// Maximum publishes held while disconnected.
    pub offline_buffer_size: usize,
    /// Capacity of the inbound frame channel.
    pub frame_buffer_size: usize,
    /// Reconnect backoff.
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            offline_buffer_size: 100,
            frame_buffer_size: 256,
            retry: RetryPolicy::default(),
        }
    }
}

/// Mutable session state, guarded by one async lock so that subscription
/// changes never interleave with connection restore.
#[derive(Default)]
struct SessionState {
    connected: bool,
    rooms: BTreeSet<RoomId>,
    users: BTreeSet<UserId>,
    offline: VecDeque<Publish>,
}

struct SessionInner {
    broker: Arc<dyn Broker>,
    account: Account,
    client_id: String,
    config: SessionConfig,
    state: Mutex<SessionState>,
    /// Raised when an outgoing request fails on a link that still looks up
    /// to the receive loop.
    link_lost: Notify,
}

/// Subscription QoS per room event kind.
fn room_qos(kind: RoomEventKind) -> QoS {
    match kind {
        RoomEventKind::Typing => QoS::AtMostOnce,
        RoomEventKind::Delivered | RoomEventKind::Read => QoS::AtLeastOnce,
    }
}

impl SessionInner {
    fn presence(&self, online: bool) -> Publish {
        Publish::new(
            user_status_topic(&self.account.user_id),
            PresencePayload::now(online).encode(),
            QoS::ExactlyOnce,
            true,
        )
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            client_id: self.client_id.clone(),
            clean_session: false,
            last_will: Some(self.presence(false)),
        }
    }

    async fn subscribe_room(&self, room_id: RoomId) -> Result<()> {
        for kind in RoomEventKind::ALL {
            self.broker
                .subscribe(&room_filter(room_id, kind), room_qos(kind))
                .await?;
        }
        Ok(())
    }

    async fn unsubscribe_room(&self, room_id: RoomId) -> Result<()> {
        for kind in RoomEventKind::ALL {
            self.broker.unsubscribe(&room_filter(room_id, kind)).await?;
        }
        Ok(())
    }

    /// Restore presence and subscriptions, then flush the offline buffer.
    async fn restore(&self, state: &mut SessionState) -> Result<()> {
        self.broker.publish(self.presence(true)).await?;
        self.broker
            .subscribe(&new_comment_topic(&self.account.token), QoS::AtLeastOnce)
            .await?;
        for room_id in &state.rooms {
            self.subscribe_room(*room_id).await?;
        }
        for user in &state.users {
            self.broker
                .subscribe(&user_status_topic(user), QoS::AtLeastOnce)
                .await?;
        }

        while let Some(publish) = state.offline.pop_front() {
            if let Err(e) = self.broker.publish(publish.clone()).await {
                state.offline.push_front(publish);
                return Err(e);
            }
        }
        Ok(())
    }

    fn buffer(&self, state: &mut SessionState, publish: Publish) {
        if state.offline.len() >= self.config.offline_buffer_size {
            warn!(topic = %publish.topic, "offline buffer full, dropping publish");
            return;
        }
        state.offline.push_back(publish);
    }

    async fn send(&self, publish: Publish) {
        let mut state = self.state.lock().await;
        if !state.connected {
            self.buffer(&mut state, publish);
            return;
        }
        if let Err(e) = self.broker.publish(publish.clone()).await {
            warn!(topic = %publish.topic, error = %e, "publish failed, buffering");
            self.buffer(&mut state, publish);
            self.lose_link(&mut state);
        }
    }

    /// Mark the link down and wake the run loop so it reconnects, restores
    /// subscriptions and flushes the buffer.
    fn lose_link(&self, state: &mut SessionState) {
        state.connected = false;
        self.link_lost.notify_one();
    }

    async fn mark_disconnected(&self) {
        self.state.lock().await.connected = false;
    }
}

/// A persistent broker session for one account.
pub struct TransportSession {
    inner: Arc<SessionInner>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    /// Create a session. Nothing happens until [`TransportSession::start`].
    pub fn new(broker: Arc<dyn Broker>, account: Account, config: SessionConfig) -> Self {
        let client_id = config.client_id.clone().unwrap_or_else(|| {
            let suffix: [u8; 6] = rand::thread_rng().gen();
            format!("{}-{}", account.user_id, hex::encode(suffix))
        });
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(SessionInner {
                broker,
                account,
                client_id,
                config,
                state: Mutex::new(SessionState::default()),
                link_lost: Notify::new(),
            }),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn account(&self) -> &Account {
        &self.inner.account
    }

    /// Spawn the session task. Returns the inbound frame stream.
    pub async fn start(&self) -> Result<mpsc::Receiver<Publish>> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let (frames_tx, frames_rx) = mpsc::channel(self.inner.config.frame_buffer_size.max(1));
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(run(Arc::clone(&self.inner), frames_tx, shutdown)));

        Ok(frames_rx)
    }

    /// Whether the broker connection is currently established and restored.
    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.connected
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to typing, delivered and read events of a room.
    ///
    /// The room is remembered and resubscribed after every reconnect, so a
    /// failed subscribe is retried by the next reconnect rather than
    /// returned.
    pub async fn listen_room(&self, room_id: RoomId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.rooms.insert(room_id);
        if state.connected {
            if let Err(e) = self.inner.subscribe_room(room_id).await {
                warn!(room = %room_id, error = %e, "room subscribe failed, reconnecting");
                self.inner.lose_link(&mut state);
            }
        }
        debug!(room = %room_id, "listening to room");
        Ok(())
    }

    /// Remove a room's subscriptions. Unknown rooms are a no-op.
    pub async fn unlisten_room(&self, room_id: RoomId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !state.rooms.remove(&room_id) {
            return Ok(());
        }
        if state.connected {
            if let Err(e) = self.inner.unsubscribe_room(room_id).await {
                warn!(room = %room_id, error = %e, "room unsubscribe failed, reconnecting");
                self.inner.lose_link(&mut state);
            }
        }
        debug!(room = %room_id, "stopped listening to room");
        Ok(())
    }

    /// Subscribe to a user's presence.
    pub async fn listen_user_status(&self, user: &UserId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.users.insert(user.clone());
        if state.connected {
            let subscribed = self
                .inner
                .broker
                .subscribe(&user_status_topic(user), QoS::AtLeastOnce)
                .await;
            if let Err(e) = subscribed {
                warn!(%user, error = %e, "status subscribe failed, reconnecting");
                self.inner.lose_link(&mut state);
            }
        }
        Ok(())
    }

    /// Remove a presence subscription. Unknown users are a no-op.
    pub async fn unlisten_user_status(&self, user: &UserId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !state.users.remove(user) {
            return Ok(());
        }
        if state.connected {
            if let Err(e) = self.inner.broker.unsubscribe(&user_status_topic(user)).await {
                warn!(%user, error = %e, "status unsubscribe failed, reconnecting");
                self.inner.lose_link(&mut state);
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing
    // ─────────────────────────────────────────────────────────────────────────

    fn room_topic(&self, room_id: RoomId, topic_id: TopicId, kind: RoomEventKind) -> String {
        Topic::Room {
            room_id,
            topic_id,
            user: self.inner.account.user_id.clone(),
            kind,
        }
        .to_string()
    }

    /// Publish a typing indicator. Fire-and-forget.
    pub async fn publish_typing(&self, room_id: RoomId, topic_id: TopicId, typing: bool) {
        let topic = self.room_topic(room_id, topic_id, RoomEventKind::Typing);
        self.inner
            .send(Publish::new(topic, encode_typing(typing), QoS::AtMostOnce, false))
            .await;
    }

    /// Publish a delivery receipt for a comment.
    pub async fn publish_delivered(
        &self,
        room_id: RoomId,
        topic_id: TopicId,
        comment_id: CommentId,
        unique_id: UniqueId,
    ) {
        self.publish_receipt(room_id, topic_id, RoomEventKind::Delivered, comment_id, unique_id)
            .await;
    }

    /// Publish a read receipt for a comment.
    pub async fn publish_read(
        &self,
        room_id: RoomId,
        topic_id: TopicId,
        comment_id: CommentId,
        unique_id: UniqueId,
    ) {
        self.publish_receipt(room_id, topic_id, RoomEventKind::Read, comment_id, unique_id)
            .await;
    }

    async fn publish_receipt(
        &self,
        room_id: RoomId,
        topic_id: TopicId,
        kind: RoomEventKind,
        comment_id: CommentId,
        unique_id: UniqueId,
    ) {
        let topic = self.room_topic(room_id, topic_id, kind);
        let payload = ReceiptPayload::new(comment_id, unique_id).encode();
        self.inner
            .send(Publish::new(topic, payload, QoS::AtLeastOnce, true))
            .await;
    }

    /// Publish this user's presence.
    pub async fn publish_presence(&self, online: bool) {
        self.inner.send(self.inner.presence(online)).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Stop the session task without touching the broker connection.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
    }

    /// Publish offline presence, disconnect cleanly and forget every
    /// listened room and user.
    pub async fn logout(&self) {
        self.stop().await;

        let mut state = self.inner.state.lock().await;
        if state.connected {
            if let Err(e) = self.inner.broker.publish(self.inner.presence(false)).await {
                warn!(error = %e, "failed to publish offline presence");
            }
        }
        if let Err(e) = self.inner.broker.disconnect().await {
            warn!(error = %e, "broker disconnect failed");
        }
        *state = SessionState::default();
        info!(user = %self.inner.account.user_id, "logged out");
    }
}

/// Wait for `delay` unless shutdown is signalled first. Returns `false` on
/// shutdown.
async fn backoff(delay: std::time::Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn run(
    inner: Arc<SessionInner>,
    frames: mpsc::Sender<Publish>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        // Connect and restore under the state lock so that listen/unlisten
        // calls and buffered publishes observe a consistent view.
        let connected = match inner.broker.connect(&inner.connect_options()).await {
            Ok(resumed) => {
                let mut state = inner.state.lock().await;
                match inner.restore(&mut state).await {
                    Ok(()) => {
                        state.connected = true;
                        info!(client_id = %inner.client_id, resumed, "broker connected");
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to restore session after connect");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, attempt, "broker connect failed");
                false
            }
        };

        if connected {
            attempt = 0;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    frame = inner.broker.recv() => match frame {
                        Ok(publish) => {
                            if frames.send(publish).await.is_err() {
                                debug!("frame receiver dropped, stopping session");
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "broker connection lost");
                            inner.mark_disconnected().await;
                            break;
                        }
                    },
                    _ = inner.link_lost.notified() => {
                        warn!(
                            client_id = %inner.client_id,
                            "outgoing request failed, reconnecting"
                        );
                        if let Err(e) = inner.broker.disconnect().await {
                            debug!(error = %e, "disconnect before reconnect failed");
                        }
                        break;
                    }
                }
            }
        }

        let delay = inner.config.retry.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        if !backoff(delay, &mut shutdown).await {
            return;
        }
    }
}
