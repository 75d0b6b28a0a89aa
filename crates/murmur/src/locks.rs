//! Per-room write locks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use murmur_core::RoomId;

/// One async mutex per room.
///
/// Every read-modify-write against the store happens while holding the
/// room's guard, so the dispatcher, catch-up and delete paths are
/// linearized per room. Rooms never block each other.
#[derive(Debug, Default)]
pub struct RoomLocks {
    rooms: Mutex<HashMap<RoomId, Arc<Mutex<()>>>>,
}

impl RoomLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `room_id`.
    pub async fn lock(&self, room_id: RoomId) -> OwnedMutexGuard<()> {
        let room = {
            let mut rooms = self.rooms.lock().await;
            Arc::clone(rooms.entry(room_id).or_default())
        };
        room.lock_owned().await
    }
}
