//! The chat client: one account's engine, wired together.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use murmur_core::{
    Account, Comment, CommentBuilder, CommentRecord, RoomId, TopicId, UniqueId, UserId,
};
use murmur_store::Store;
use murmur_sync::{Broker, SyncApi, TransportSession};

use crate::catchup::CatchUp;
use crate::config::ClientConfig;
use crate::delete::{DeleteBatch, DeleteReconciler, DeleteReport, DeleteTarget};
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, Result};
use crate::listener::{DeleteCommentListener, EventHub, EventStream};
use crate::locks::RoomLocks;
use crate::state_machine::CommentStateMachine;

/// A chat client for one authenticated account.
///
/// Owns the broker session, the store handle and the engine pieces that
/// write to it:
/// - the dispatcher (push channel),
/// - catch-up (pull channel),
/// - the delete reconciler.
///
/// All three share one set of room locks.
pub struct ChatClient<S: Store, A: SyncApi> {
    account: Account,
    store: Arc<S>,
    api: Arc<A>,
    session: Arc<TransportSession>,
    machine: Arc<CommentStateMachine<S>>,
    catch_up: CatchUp<S, A>,
    reconciler: DeleteReconciler<S>,
    hub: EventHub,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Store + 'static, A: SyncApi> ChatClient<S, A> {
    /// Create a client. Nothing connects until [`ChatClient::start`].
    pub fn new(
        account: Account,
        store: S,
        api: A,
        broker: Arc<dyn Broker>,
        config: ClientConfig,
    ) -> Self {
        Self::with_shared(account, Arc::new(store), Arc::new(api), broker, config)
    }

    /// Create a client over a store and API shared with other owners.
    pub fn with_shared(
        account: Account,
        store: Arc<S>,
        api: Arc<A>,
        broker: Arc<dyn Broker>,
        config: ClientConfig,
    ) -> Self {
        let locks = Arc::new(RoomLocks::new());
        let hub = EventHub::new(config.events.capacity);
        let machine = Arc::new(CommentStateMachine::new(Arc::clone(&store), Arc::clone(&locks)));
        let session = Arc::new(TransportSession::new(broker, account.clone(), config.session));

        Self {
            catch_up: CatchUp::new(Arc::clone(&api), Arc::clone(&machine), config.catch_up),
            reconciler: DeleteReconciler::new(Arc::clone(&store), locks, hub.clone()),
            account,
            store,
            api,
            session,
            machine,
            hub,
            dispatcher: Mutex::new(None),
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    /// The comment write path, for confirming or failing sends.
    pub fn comments(&self) -> &Arc<CommentStateMachine<S>> {
        &self.machine
    }

    pub fn catch_up(&self) -> &CatchUp<S, A> {
        &self.catch_up
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the broker session and the dispatcher task.
    pub async fn start(&self) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock().await;
        let frames = self.session.start().await?;
        let task = Dispatcher::new(
            Arc::clone(&self.session),
            Arc::clone(&self.machine),
            self.hub.clone(),
        );
        *dispatcher = Some(tokio::spawn(task.run(frames)));
        info!(user = %self.account.user_id, "chat client started");
        Ok(())
    }

    /// Stop the session task and wait for the dispatcher to drain.
    ///
    /// The broker connection is left as is; use [`ChatClient::logout`] to
    /// end it.
    pub async fn shutdown(&self) {
        self.session.stop().await;
        self.join_dispatcher().await;
    }

    /// Publish offline presence, disconnect and forget every listened room
    /// and user.
    pub async fn logout(&self) {
        self.session.logout().await;
        self.join_dispatcher().await;
    }

    async fn join_dispatcher(&self) {
        let handle = self.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatcher task ended abnormally");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    pub async fn add_delete_listener(&self, listener: Arc<dyn DeleteCommentListener>) {
        self.hub.add_delete_listener(listener).await;
    }

    pub async fn remove_delete_listener(&self, listener: &Arc<dyn DeleteCommentListener>) {
        self.hub.remove_delete_listener(listener).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn listen_room(&self, room_id: RoomId) -> Result<()> {
        Ok(self.session.listen_room(room_id).await?)
    }

    pub async fn unlisten_room(&self, room_id: RoomId) -> Result<()> {
        Ok(self.session.unlisten_room(room_id).await?)
    }

    pub async fn listen_user_status(&self, user: &UserId) -> Result<()> {
        Ok(self.session.listen_user_status(user).await?)
    }

    pub async fn unlisten_user_status(&self, user: &UserId) -> Result<()> {
        Ok(self.session.unlisten_user_status(user).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn publish_typing(&self, room_id: RoomId, topic_id: TopicId, typing: bool) {
        self.session.publish_typing(room_id, topic_id, typing).await;
    }

    /// Tell the sender of `comment` that we have read it.
    pub async fn mark_read(&self, comment: &Comment) {
        let Some(id) = comment.id else { return };
        self.session
            .publish_read(comment.room_id, comment.topic_id, id, comment.unique_id.clone())
            .await;
    }

    /// Compose a text comment and store it as pending.
    ///
    /// Posting it to the server is up to the caller; feed the server's copy
    /// back through [`CommentStateMachine::apply_comment`], or call
    /// [`CommentStateMachine::mark_failed`].
    pub async fn compose_comment(
        &self,
        room_id: RoomId,
        topic_id: TopicId,
        message: impl Into<String>,
    ) -> Result<Comment> {
        let mut comment = CommentBuilder::new(room_id, self.account.user_id.clone())
            .topic(topic_id)
            .message(message)
            .sender_name(self.account.username.clone())
            .build();
        comment.sender_avatar = self.account.avatar_url.clone();
        self.machine.record_pending(comment).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Deletion
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete comments for everyone and reconcile the local store.
    pub async fn delete_comments(
        &self,
        unique_ids: &[UniqueId],
        hard: bool,
    ) -> Result<DeleteReport> {
        let records = self.api.delete_comments(unique_ids, hard).await?;
        let targets = records.into_iter().filter_map(delete_target).collect();

        Ok(self
            .reconciler
            .reconcile(DeleteBatch {
                targets,
                hard,
                actor: self.account.user_id.clone(),
            })
            .await)
    }

    /// Apply deletions announced by another member.
    pub async fn reconcile_deleted(&self, batch: DeleteBatch) -> DeleteReport {
        self.reconciler.reconcile(batch).await
    }

    /// Server-side comment search.
    ///
    /// The endpoint has been withdrawn; always fails with
    /// [`ClientError::Unsupported`].
    pub async fn search_comments(
        &self,
        _query: &str,
        _room_id: Option<RoomId>,
    ) -> Result<Vec<Comment>> {
        Err(ClientError::Unsupported("server-side comment search"))
    }
}

fn delete_target(record: Value) -> Option<DeleteTarget> {
    match CommentRecord::from_value(record) {
        Ok(record) => Some(DeleteTarget::new(RoomId(record.room_id), record.unique_id)),
        Err(e) => {
            warn!(error = %e, "skipping malformed delete record");
            None
        }
    }
}
