//! Event hub: typed broadcast of engine events plus delete listeners.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use murmur_core::{Comment, CommentId, CommentState, RoomId, TopicId, UniqueId, UserId};

/// Broadcast event stream handed to subscribers.
pub type EventStream = broadcast::Receiver<ChatEvent>;

/// An event emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A comment from another user was received and stored.
    CommentReceived(Comment),
    /// A room member started or stopped typing.
    Typing {
        room_id: RoomId,
        topic_id: TopicId,
        user: UserId,
        typing: bool,
    },
    /// A user's presence changed.
    Presence {
        user: UserId,
        online: bool,
        last_seen: DateTime<Utc>,
    },
    /// A member acknowledged a comment as delivered or read.
    RoomState {
        room_id: RoomId,
        topic_id: TopicId,
        user: UserId,
        state: CommentState,
        comment_id: CommentId,
        unique_id: UniqueId,
    },
    /// A batch of comments was deleted.
    CommentsDeleted {
        comments: Vec<Comment>,
        hard: bool,
        actor: UserId,
    },
}

/// Receives one consolidated callback per delete batch.
pub trait DeleteCommentListener: Send + Sync {
    fn on_comments_deleted(&self, comments: &[Comment], hard: bool);
}

/// Fan-out point for engine events.
///
/// Cloning is cheap; clones share subscribers and listeners.
#[derive(Clone)]
pub struct EventHub {
    events: broadcast::Sender<ChatEvent>,
    delete_listeners: Arc<RwLock<Vec<Arc<dyn DeleteCommentListener>>>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            events,
            delete_listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe to emitted events.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Best-effort: with no subscribers the event is dropped.
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    pub async fn add_delete_listener(&self, listener: Arc<dyn DeleteCommentListener>) {
        self.delete_listeners.write().await.push(listener);
    }

    /// Remove a listener previously added. Compared by identity.
    pub async fn remove_delete_listener(&self, listener: &Arc<dyn DeleteCommentListener>) {
        self.delete_listeners
            .write()
            .await
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Deliver one delete notification to every listener and subscriber.
    pub async fn notify_deleted(&self, comments: Vec<Comment>, hard: bool, actor: UserId) {
        for listener in self.delete_listeners.read().await.iter() {
            listener.on_comments_deleted(&comments, hard);
        }
        self.emit(ChatEvent::CommentsDeleted {
            comments,
            hard,
            actor,
        });
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use murmur_core::CommentBuilder;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(usize, bool)>>,
    }

    impl DeleteCommentListener for Recorder {
        fn on_comments_deleted(&self, comments: &[Comment], hard: bool) {
            self.calls.lock().unwrap().push((comments.len(), hard));
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_listeners_and_subscribers() {
        let hub = EventHub::new(8);
        let recorder = Arc::new(Recorder::default());
        hub.add_delete_listener(recorder.clone()).await;
        let mut events = hub.subscribe();

        let comment = CommentBuilder::new(RoomId(1), "bob").id(1).build();
        hub.notify_deleted(vec![comment], true, UserId::from("alice"))
            .await;

        assert_eq!(*recorder.calls.lock().unwrap(), vec![(1, true)]);
        match events.recv().await.unwrap() {
            ChatEvent::CommentsDeleted { comments, hard, actor } => {
                assert_eq!(comments.len(), 1);
                assert!(hard);
                assert_eq!(actor, UserId::from("alice"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_removed_listener_is_not_called() {
        let hub = EventHub::default();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn DeleteCommentListener> = recorder.clone();
        hub.add_delete_listener(Arc::clone(&listener)).await;
        hub.remove_delete_listener(&listener).await;

        hub.notify_deleted(Vec::new(), false, UserId::from("alice"))
            .await;
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_emit_without_subscribers() {
        EventHub::default().emit(ChatEvent::Typing {
            room_id: RoomId(1),
            topic_id: TopicId(1),
            user: UserId::from("bob"),
            typing: true,
        });
    }
}
