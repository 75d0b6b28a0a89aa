//! Pull-based catch-up over the REST API.
//!
//! Used after reconnects and when paging through history. Every record is
//! parsed on its own and fed through the state machine, so one malformed
//! record costs only itself. Network failures are logged and produce an
//! empty result: catch-up is best effort and the push channel keeps running.

use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use serde_json::Value;
use tracing::{debug, warn};

use murmur_core::{Comment, CommentId, CommentRecord, RoomId};
use murmur_store::Store;
use murmur_sync::{Direction, SyncApi, SyncError};

use crate::config::CatchUpConfig;
use crate::state_machine::CommentStateMachine;

/// Fetches comments from the server and applies them locally.
pub struct CatchUp<S: Store, A: SyncApi> {
    api: Arc<A>,
    machine: Arc<CommentStateMachine<S>>,
    config: CatchUpConfig,
}

impl<S: Store, A: SyncApi> CatchUp<S, A> {
    pub fn new(api: Arc<A>, machine: Arc<CommentStateMachine<S>>, config: CatchUpConfig) -> Self {
        Self {
            api,
            machine,
            config,
        }
    }

    /// Older comments of a room, ending before `before_id`.
    pub async fn fetch_before(&self, room_id: RoomId, before_id: CommentId) -> Vec<Comment> {
        self.fetch(room_id, before_id, Direction::Before).await
    }

    /// Newer comments of a room, after `after_id`.
    pub async fn fetch_after(&self, room_id: RoomId, after_id: CommentId) -> Vec<Comment> {
        self.fetch(room_id, after_id, Direction::After).await
    }

    /// Fill the gap in one room since its latest stored comment.
    pub async fn resume(&self, room_id: RoomId) -> Vec<Comment> {
        self.resume_at(room_id, Local::now()).await
    }

    /// [`CatchUp::resume`] with an explicit clock.
    ///
    /// Skipped (empty result) when the room has no acknowledged comment, or
    /// when the latest one is not from the calendar day of `now` in `now`'s
    /// timezone.
    pub async fn resume_at<Tz: TimeZone>(
        &self,
        room_id: RoomId,
        now: DateTime<Tz>,
    ) -> Vec<Comment> {
        let Some(checkpoint) = self.checkpoint(Some(room_id), &now).await else {
            return Vec::new();
        };
        self.fetch_after(room_id, checkpoint).await
    }

    /// Fill the gap across every room since the latest stored comment.
    pub async fn sync_all(&self) -> Vec<Comment> {
        self.sync_all_at(Local::now()).await
    }

    /// [`CatchUp::sync_all`] with an explicit clock.
    pub async fn sync_all_at<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Vec<Comment> {
        let Some(checkpoint) = self.checkpoint(None, &now).await else {
            return Vec::new();
        };
        match self.api.sync(checkpoint).await {
            Ok(records) => self.ingest(records).await,
            Err(e) => {
                log_failure("sync", &e);
                Vec::new()
            }
        }
    }

    async fn fetch(
        &self,
        room_id: RoomId,
        last_id: CommentId,
        direction: Direction,
    ) -> Vec<Comment> {
        match self.api.load_comments(room_id, last_id, direction).await {
            Ok(records) => self.ingest(records).await,
            Err(e) => {
                log_failure("load_comments", &e);
                Vec::new()
            }
        }
    }

    /// The id to resume from, if resuming is allowed at `now`.
    async fn checkpoint<Tz: TimeZone>(
        &self,
        room_id: Option<RoomId>,
        now: &DateTime<Tz>,
    ) -> Option<CommentId> {
        let latest = match self.machine.store().get_latest_comment(room_id).await {
            Ok(latest) => latest?,
            Err(e) => {
                warn!(error = %e, "failed to read catch-up checkpoint");
                return None;
            }
        };

        if self.config.today_only {
            let latest_day = latest.timestamp.with_timezone(&now.timezone()).date_naive();
            if latest_day != now.date_naive() {
                debug!(
                    checkpoint = ?latest.id,
                    "latest comment is not from today, skipping resume"
                );
                return None;
            }
        }
        latest.id
    }

    async fn ingest(&self, records: Vec<Value>) -> Vec<Comment> {
        let mut applied = Vec::with_capacity(records.len());

        for record in records {
            let comment = match CommentRecord::from_value(record).and_then(Comment::try_from) {
                Ok(comment) => comment,
                Err(e) => {
                    warn!(error = %e, "skipping malformed comment record");
                    continue;
                }
            };
            match self.machine.apply_comment(comment).await {
                Ok((_, stored)) => applied.push(stored),
                Err(e) => warn!(error = %e, "failed to apply fetched comment"),
            }
        }

        debug!(count = applied.len(), "catch-up applied comments");
        applied
    }
}

fn log_failure(endpoint: &'static str, error: &SyncError) {
    warn!(endpoint, error = %error, "catch-up request failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, Utc};
    use murmur_core::{CommentBuilder, CommentState};
    use murmur_store::MemoryStore;
    use murmur_sync::{ApiCall, MemoryApi};
    use serde_json::json;

    use crate::locks::RoomLocks;

    struct Setup {
        api: Arc<MemoryApi>,
        store: Arc<MemoryStore>,
        catch_up: CatchUp<MemoryStore, MemoryApi>,
    }

    fn setup() -> Setup {
        let api = Arc::new(MemoryApi::new());
        let store = Arc::new(MemoryStore::new());
        let machine = Arc::new(CommentStateMachine::new(
            Arc::clone(&store),
            Arc::new(RoomLocks::new()),
        ));
        let catch_up = CatchUp::new(Arc::clone(&api), machine, CatchUpConfig::default());
        Setup {
            api,
            store,
            catch_up,
        }
    }

    fn comment(id: u64, timestamp: DateTime<Utc>) -> Comment {
        CommentBuilder::new(RoomId(1), "bob")
            .id(id)
            .unique_id(format!("u-{id}"))
            .before(id.saturating_sub(1))
            .timestamp(timestamp)
            .state(CommentState::Sent)
            .build()
    }

    #[tokio::test]
    async fn test_fetch_skips_malformed_records() {
        let s = setup();
        let now = Utc::now();
        s.api.push(&comment(1, now)).await;
        s.api.push_raw(json!({"room_id": 1, "message": "no id"})).await;
        s.api.push(&comment(2, now)).await;

        let fetched = s.catch_up.fetch_after(RoomId(1), CommentId(0)).await;
        assert_eq!(fetched.len(), 2);
        assert_eq!(s.store.get_comments(RoomId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let s = setup();
        s.api.set_failing(true).await;
        assert!(s
            .catch_up
            .fetch_before(RoomId(1), CommentId(10))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_resume_today_fetches_after_checkpoint() {
        let s = setup();
        let now = Utc::now();
        s.store.add_or_update(&comment(1, now)).await.unwrap();
        s.api.push(&comment(2, now)).await;

        let fetched = s.catch_up.resume_at(RoomId(1), now).await;
        assert_eq!(fetched.len(), 1);
        assert_eq!(
            s.api.calls().await,
            vec![ApiCall::LoadComments {
                room_id: RoomId(1),
                last_comment_id: CommentId(1),
                direction: Direction::After,
            }]
        );
    }

    #[tokio::test]
    async fn test_resume_skips_when_latest_is_old() {
        let s = setup();
        let now = Utc::now();
        s.store
            .add_or_update(&comment(1, now - Duration::days(2)))
            .await
            .unwrap();

        assert!(s.catch_up.resume_at(RoomId(1), now).await.is_empty());
        assert!(s.catch_up.sync_all_at(now).await.is_empty());
        assert!(s.api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_resume_uses_local_calendar_day() {
        let s = setup();
        // 23:30 UTC is already the next day at UTC+2.
        let latest = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        s.store.add_or_update(&comment(1, latest)).await.unwrap();

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let morning = plus_two.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        s.catch_up.resume_at(RoomId(1), morning).await;
        assert_eq!(s.api.calls().await.len(), 1);

        let utc_morning = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        s.catch_up.resume_at(RoomId(1), utc_morning).await;
        assert_eq!(s.api.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_without_history_is_skipped() {
        let s = setup();
        assert!(s.catch_up.resume(RoomId(1)).await.is_empty());
        assert!(s.api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_sync_all_spans_rooms() {
        let s = setup();
        let now = Utc::now();
        s.store.add_or_update(&comment(1, now)).await.unwrap();
        s.api.push(&comment(2, now)).await;
        let mut other = comment(3, now);
        other.room_id = RoomId(2);
        other.before_id = None;
        s.api.push(&other).await;

        let fetched = s.catch_up.sync_all_at(now).await;
        assert_eq!(fetched.len(), 2);
        assert_eq!(s.store.get_comments(RoomId(2)).await.unwrap().len(), 1);
    }
}
