//! Hot Cache of Recent Messages
//!
//! Bounded newest-first snapshot of the last N messages, used to serve
//! new-session backfill without touching the long-term store.
//!
//! The cache is volatile: after a restart it is empty and is lazily warmed
//! by the first read that falls through to the store. Deletes tombstone the
//! cached copy in place; the store stays authoritative, so a tombstone for a
//! message that has already been trimmed is an idempotent no-op.
//!
//! A single mutex guards the whole sequence. Contention is low (pushes at
//! message rate, reads at new-connection rate) so finer-grained locking is
//! not warranted.

use chathouse_core::Message;
use chrono::Utc;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default number of messages retained, matching the backfill window.
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded newest-first cache of recent messages.
pub struct RecentCache {
    capacity: usize,
    entries: Mutex<VecDeque<Message>>,
}

impl RecentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Insert at the head and trim the tail to capacity.
    pub async fn push(&self, message: Message) {
        let mut entries = self.entries.lock().await;
        entries.push_front(message);
        entries.truncate(self.capacity);
    }

    /// The newest `limit` messages, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Message> {
        let entries = self.entries.lock().await;
        entries.iter().take(limit).cloned().collect()
    }

    /// Flip the delete flags on a cached message in place.
    ///
    /// Returns whether the message was present. Missing ids are fine: the
    /// message may have been trimmed already, and storage is authoritative.
    pub async fn tombstone(&self, message_id: Uuid, by_moderator: bool) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|m| m.message_id == message_id) {
            Some(message) => {
                if message.deleted_at.is_none() {
                    message.deleted_at = Some(Utc::now());
                    message.deleted_by_moderator = by_moderator;
                }
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
