//! Event dispatcher: routes inbound broker frames.
//!
//! Frames are decoded into [`InboundEvent`]s. Events originating from the
//! current user are echoes of our own publishes and are dropped, except for
//! self-sent comments, which are merged silently so that other devices of
//! the same account stay in sync. Comments from others are acknowledged with
//! a delivery receipt, applied through the state machine and broadcast.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use murmur_core::{Account, Comment};
use murmur_store::Store;
use murmur_sync::{InboundEvent, Publish, TransportSession};

use crate::listener::{ChatEvent, EventHub};
use crate::state_machine::CommentStateMachine;

/// Routes decoded frames to the state machine and the event hub.
pub struct Dispatcher<S: Store> {
    account: Account,
    session: Arc<TransportSession>,
    machine: Arc<CommentStateMachine<S>>,
    hub: EventHub,
}

impl<S: Store> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            account: self.account.clone(),
            session: Arc::clone(&self.session),
            machine: Arc::clone(&self.machine),
            hub: self.hub.clone(),
        }
    }
}

impl<S: Store> Dispatcher<S> {
    pub fn new(
        session: Arc<TransportSession>,
        machine: Arc<CommentStateMachine<S>>,
        hub: EventHub,
    ) -> Self {
        Self {
            account: session.account().clone(),
            session,
            machine,
            hub,
        }
    }

    /// Dispatch frames until the session closes the channel.
    pub async fn run(self, mut frames: mpsc::Receiver<Publish>) {
        while let Some(frame) = frames.recv().await {
            self.dispatch(&frame).await;
        }
        debug!("frame channel closed, dispatcher stopping");
    }

    /// Handle one frame. Never fails: bad frames are logged and dropped.
    pub async fn dispatch(&self, frame: &Publish) {
        let event = match InboundEvent::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic = %frame.topic, error = %e, "dropping malformed frame");
                return;
            }
        };

        let own = event.origin() == &self.account.user_id;
        match event {
            InboundEvent::NewComment(comment) if own => self.merge_own(comment).await,
            _ if own => trace!(topic = %frame.topic, "dropping self echo"),
            InboundEvent::NewComment(comment) => self.on_comment(comment).await,
            InboundEvent::Typing {
                room_id,
                topic_id,
                user,
                typing,
            } => self.hub.emit(ChatEvent::Typing {
                room_id,
                topic_id,
                user,
                typing,
            }),
            InboundEvent::Receipt {
                room_id,
                topic_id,
                user,
                state,
                receipt,
            } => {
                if let Err(e) = self
                    .machine
                    .apply_receipt(room_id, &user, state, &receipt)
                    .await
                {
                    warn!(room = %room_id, error = %e, "failed to apply receipt");
                }
                self.hub.emit(ChatEvent::RoomState {
                    room_id,
                    topic_id,
                    user,
                    state,
                    comment_id: receipt.comment_id,
                    unique_id: receipt.unique_id,
                });
            }
            InboundEvent::Presence { user, presence } => self.hub.emit(ChatEvent::Presence {
                user,
                online: presence.online,
                last_seen: presence.last_seen,
            }),
        }
    }

    async fn on_comment(&self, comment: Comment) {
        if let Some(id) = comment.id {
            self.session
                .publish_delivered(comment.room_id, comment.topic_id, id, comment.unique_id.clone())
                .await;
        }

        match self.machine.apply_comment(comment).await {
            Ok((_, stored)) => self.hub.emit(ChatEvent::CommentReceived(stored)),
            Err(e) => warn!(error = %e, "failed to store received comment"),
        }
    }

    async fn merge_own(&self, comment: Comment) {
        if let Err(e) = self.machine.apply_comment(comment).await {
            warn!(error = %e, "failed to merge own comment");
        }
    }
}
