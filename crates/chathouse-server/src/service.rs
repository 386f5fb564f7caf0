//! Message Service
//!
//! The orchestrator of the durability-first pipeline. A send is:
//!
//! 1. validate and HTML-escape the content
//! 2. assign the stable id and server timestamp
//! 3. append to the log and force to disk (the durability boundary;
//!    failure here rejects the send and nothing else observes the message)
//! 4. fan out to every live session through the broadcast capability
//! 5. push into the hot cache asynchronously (best effort)
//! 6. return the message so the caller can acknowledge
//!
//! The service owns the append log (exclusive writer) and the batch drainer
//! task. It takes a broadcast function at construction rather than a
//! registry reference, keeping ownership cycle-free.
//!
//! ## Batch drainer
//!
//! On a fixed tick: snapshot the log, batch-insert into the store, then
//! compact the log. Any failure aborts the cycle without compaction and the
//! next tick retries from the same log state; the store's idempotent insert
//! makes a crash between insert and compact safe. Durability is provided by
//! the log, not the drainer.
//!
//! ## Startup
//!
//! The log is opened and read at boot but NOT replayed into the broadcast
//! or eagerly re-inserted; entries wait for the first drain tick. After a
//! crash restart, up to one drain interval of history is absent from
//! `recent` until then. Documented behavior, not a bug.

use chathouse_core::{content, Message, ServerFrame};
use chathouse_storage::{MessageWal, RecentCache, WalEntry};
use chathouse_store::MessageStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fan-out capability provided by the session registry.
pub type BroadcastFn = Arc<dyn Fn(&ServerFrame) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    InvalidContent(#[from] chathouse_core::Error),

    #[error("message not found")]
    NotFound,

    #[error("unauthorized to delete this message")]
    Forbidden,

    #[error("failed to write to log: {0}")]
    Wal(#[from] chathouse_storage::Error),

    #[error(transparent)]
    Store(#[from] chathouse_store::StoreError),
}

pub struct MessageService {
    wal: Arc<MessageWal>,
    cache: Arc<RecentCache>,
    store: Arc<dyn MessageStore>,
    broadcast: BroadcastFn,
}

impl MessageService {
    pub fn new(
        wal: Arc<MessageWal>,
        cache: Arc<RecentCache>,
        store: Arc<dyn MessageStore>,
        broadcast: BroadcastFn,
    ) -> Self {
        Self {
            wal,
            cache,
            store,
            broadcast,
        }
    }

    /// Accept a message: validate, escape, journal, fan out, cache.
    ///
    /// The returned message is what the caller acknowledges with; a send
    /// that fails at the log is never observed by any other component.
    pub async fn send(
        &self,
        user_id: Uuid,
        username: &str,
        raw_content: &str,
    ) -> Result<Message, ServiceError> {
        content::validate(raw_content)?;
        let escaped = content::escape_html(raw_content);

        let message = Message::accepted(user_id, username.to_string(), escaped);

        let entry = WalEntry {
            message_id: message.message_id,
            user_id: message.user_id,
            content: message.content.clone(),
            timestamp: message.created_at,
        };
        self.wal.append(&entry).await?;

        debug!(message_id = %message.message_id, user_id = %user_id, "message accepted");

        // Fan-out never waits on any individual peer; the registry's queues
        // are bounded and try_send only.
        (self.broadcast)(&ServerFrame::from_message(&message, false));

        // Cache push is best-effort and off the ack path.
        let cache = self.cache.clone();
        let cached = message.clone();
        tokio::spawn(async move {
            cache.push(cached).await;
        });

        Ok(message)
    }

    /// The newest `limit` messages, newest first. Served from the hot cache
    /// when warm; a miss falls through to the store and rewarms the cache
    /// asynchronously.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Message>, ServiceError> {
        let cached = self.cache.recent(limit).await;
        if !cached.is_empty() {
            debug!(count = cached.len(), "recent served from cache");
            return Ok(cached);
        }

        let messages = self.store.get_recent(limit as u32).await?;
        debug!(count = messages.len(), "recent served from store");

        if !messages.is_empty() {
            // Push oldest first so the cache ends up newest-at-head.
            let cache = self.cache.clone();
            let warm = messages.clone();
            tokio::spawn(async move {
                for message in warm.into_iter().rev() {
                    cache.push(message).await;
                }
            });
        }

        Ok(messages)
    }

    /// Paginated history: messages with internal sequence strictly below
    /// `seq`. Strictly historical, so the cache is never consulted.
    pub async fn before(&self, seq: i64, limit: u32) -> Result<Vec<Message>, ServiceError> {
        Ok(self.store.get_before(seq, limit).await?)
    }

    /// Tombstone a message. Only the author or a moderator may delete; the
    /// store is authoritative and the cache update is best-effort.
    ///
    /// A message that is still only in the log (not yet drained) is not
    /// deletable and reports not-found.
    pub async fn delete(
        &self,
        message_id: Uuid,
        requester: Uuid,
        requester_is_moderator: bool,
    ) -> Result<(), ServiceError> {
        let message = self
            .store
            .get_by_message_id(message_id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        if !requester_is_moderator && message.user_id != requester {
            warn!(
                message_id = %message_id,
                requester = %requester,
                owner = %message.user_id,
                "unauthorized delete attempt"
            );
            return Err(ServiceError::Forbidden);
        }

        self.store
            .soft_delete(message_id, requester, requester_is_moderator)
            .await?;

        if !self.cache.tombstone(message_id, requester_is_moderator).await {
            debug!(message_id = %message_id, "deleted message not in cache");
        }

        (self.broadcast)(&ServerFrame::MessageDeleted {
            message_id: message_id.to_string(),
            deleted_by_admin: requester_is_moderator,
        });

        info!(
            message_id = %message_id,
            deleted_by = %requester,
            by_moderator = requester_is_moderator,
            "message deleted"
        );
        Ok(())
    }

    /// One drain cycle: log snapshot → batch insert → compact. Returns how
    /// many entries were drained. A failure before compaction leaves the
    /// log untouched for the next tick.
    pub async fn drain_once(&self) -> Result<usize, ServiceError> {
        let entries = self.wal.snapshot().await?;
        if entries.is_empty() {
            return Ok(0);
        }

        // Author names are resolved by the store; log entries carry none.
        let messages: Vec<Message> = entries
            .iter()
            .map(|entry| Message {
                seq: None,
                message_id: entry.message_id,
                user_id: entry.user_id,
                username: String::new(),
                content: entry.content.clone(),
                created_at: entry.timestamp,
                deleted_at: None,
                deleted_by: None,
                deleted_by_moderator: false,
            })
            .collect();

        self.store.batch_insert(&messages).await?;

        let persisted: HashSet<Uuid> = entries.iter().map(|entry| entry.message_id).collect();
        self.wal.compact(&persisted).await?;

        info!(count = messages.len(), "drained log entries into the store");
        Ok(messages.len())
    }

    /// Run the drainer on a fixed tick until `shutdown` fires. The first
    /// drain runs one full interval after startup; recovered log entries
    /// wait for it.
    pub fn spawn_drainer(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut tick = tokio::time::interval_at(start, every);

            info!(interval = ?every, "batch drainer started");

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = self.drain_once().await {
                            warn!(error = %e, "drain cycle failed, will retry next tick");
                        }
                    }
                    _ = &mut shutdown => {
                        info!("batch drainer shutting down");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chathouse_core::message::{DELETED_BY_MODERATOR_PLACEHOLDER, DELETED_PLACEHOLDER};
    use chathouse_storage::cache::DEFAULT_CAPACITY;
    use chathouse_store::{MessageStore, SqliteStore};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        service: Arc<MessageService>,
        store: Arc<SqliteStore>,
        cache: Arc<RecentCache>,
        frames: Arc<Mutex<Vec<ServerFrame>>>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let wal = Arc::new(
            MessageWal::open(dir.path().join("wal_messages"))
                .await
                .unwrap(),
        );
        let cache = Arc::new(RecentCache::new(DEFAULT_CAPACITY));
        let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());

        let frames: Arc<Mutex<Vec<ServerFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = frames.clone();
        let broadcast: BroadcastFn = Arc::new(move |frame| {
            captured.lock().unwrap().push(frame.clone());
        });

        let service = Arc::new(MessageService::new(
            wal,
            cache.clone(),
            store.clone(),
            broadcast,
        ));

        Fixture {
            service,
            store,
            cache,
            frames,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_send_escapes_and_broadcasts() {
        let fx = fixture().await;
        let user = Uuid::new_v4();

        let msg = fx
            .service
            .send(user, "alice", "<script>x</script>")
            .await
            .unwrap();
        assert_eq!(msg.content, "&lt;script&gt;x&lt;/script&gt;");
        assert_eq!(msg.seq, None);

        let frames = fx.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ServerFrame::Message { id, content, username, .. } => {
                assert_eq!(*id, 0);
                assert_eq!(content, "&lt;script&gt;x&lt;/script&gt;");
                assert_eq!(username, "alice");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_content() {
        let fx = fixture().await;
        let user = Uuid::new_v4();

        let empty = fx.service.send(user, "alice", "").await;
        assert!(matches!(empty, Err(ServiceError::InvalidContent(_))));

        let long = "a".repeat(5001);
        let too_long = fx.service.send(user, "alice", &long).await;
        assert!(matches!(too_long, Err(ServiceError::InvalidContent(_))));

        // Nothing reached the broadcast fabric.
        assert!(fx.frames.lock().unwrap().is_empty());
        assert_eq!(fx.service.drain_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_order_matches_send_order() {
        let fx = fixture().await;
        let user = Uuid::new_v4();

        fx.service.send(user, "alice", "first").await.unwrap();
        fx.service.send(user, "alice", "second").await.unwrap();

        let frames = fx.frames.lock().unwrap();
        let contents: Vec<&str> = frames
            .iter()
            .map(|f| match f {
                ServerFrame::Message { content, .. } => content.as_str(),
                other => panic!("unexpected frame: {:?}", other),
            })
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_drain_moves_messages_to_store_in_order() {
        let fx = fixture().await;
        let user = Uuid::new_v4();

        for content in ["m1", "m2", "m3"] {
            fx.service.send(user, "alice", content).await.unwrap();
        }

        assert_eq!(fx.service.drain_once().await.unwrap(), 3);

        let recent = fx.store.get_recent(10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[2].content, "m1");
        assert!(recent[0].seq.unwrap() > recent[2].seq.unwrap());

        // Log is empty afterwards; the next drain is a no-op.
        assert_eq!(fx.service.drain_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_falls_back_to_store_and_warms_cache() {
        let fx = fixture().await;
        let user = Uuid::new_v4();

        fx.service.send(user, "alice", "hello").await.unwrap();
        fx.service.drain_once().await.unwrap();

        // Simulate a cold cache (e.g. after restart).
        let cold = Arc::new(RecentCache::new(DEFAULT_CAPACITY));
        let service = MessageService::new(
            Arc::new(
                MessageWal::open(fx._dir.path().join("other_wal"))
                    .await
                    .unwrap(),
            ),
            cold.clone(),
            fx.store.clone(),
            Arc::new(|_| {}),
        );

        let recent = service.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "hello");
        assert!(recent[0].seq.is_some());

        // Warmup is async.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cold.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_of_undrained_message_is_not_found() {
        let fx = fixture().await;
        let user = Uuid::new_v4();

        let msg = fx.service.send(user, "alice", "pending").await.unwrap();

        // Still only in the log: the strict rule reports not-found.
        let result = fx.service.delete(msg.message_id, user, false).await;
        assert!(matches!(result, Err(ServiceError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_authorization() {
        let fx = fixture().await;
        let author = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let msg = fx.service.send(author, "alice", "mine").await.unwrap();
        fx.service.drain_once().await.unwrap();

        let denied = fx.service.delete(msg.message_id, stranger, false).await;
        assert!(matches!(denied, Err(ServiceError::Forbidden)));

        // A moderator may delete anyone's message.
        fx.service.delete(msg.message_id, stranger, true).await.unwrap();

        let stored = fx.store.get_by_message_id(msg.message_id).await.unwrap().unwrap();
        assert!(stored.is_deleted());
        assert!(stored.deleted_by_moderator);
        assert_eq!(stored.deleted_by, Some(stranger));
    }

    #[tokio::test]
    async fn test_delete_broadcasts_and_tombstones_cache() {
        let fx = fixture().await;
        let author = Uuid::new_v4();

        let msg = fx.service.send(author, "alice", "bad").await.unwrap();
        fx.service.drain_once().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await; // async cache push

        fx.service.delete(msg.message_id, author, false).await.unwrap();

        let frames = fx.frames.lock().unwrap();
        match frames.last().unwrap() {
            ServerFrame::MessageDeleted {
                message_id,
                deleted_by_admin,
            } => {
                assert_eq!(message_id, &msg.message_id.to_string());
                assert!(!deleted_by_admin);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        drop(frames);

        let cached = fx.cache.recent(10).await;
        assert!(cached[0].is_deleted());
        assert_eq!(cached[0].visible_content(false), DELETED_PLACEHOLDER);
        assert_eq!(cached[0].visible_content(true), "bad");
    }

    #[tokio::test]
    async fn test_moderator_delete_masks_with_admin_placeholder() {
        let fx = fixture().await;
        let author = Uuid::new_v4();
        let moderator = Uuid::new_v4();

        let msg = fx.service.send(author, "alice", "bad").await.unwrap();
        fx.service.drain_once().await.unwrap();

        fx.service.delete(msg.message_id, moderator, true).await.unwrap();

        let stored = fx.store.get_by_message_id(msg.message_id).await.unwrap().unwrap();
        assert_eq!(
            stored.visible_content(false),
            DELETED_BY_MODERATOR_PLACEHOLDER
        );
        assert_eq!(stored.visible_content(true), "bad");
    }

    #[tokio::test]
    async fn test_before_is_strictly_historical() {
        let fx = fixture().await;
        let user = Uuid::new_v4();

        for i in 0..5 {
            fx.service.send(user, "alice", &format!("m{}", i)).await.unwrap();
        }
        fx.service.drain_once().await.unwrap();

        let top = fx.store.get_recent(1).await.unwrap()[0].seq.unwrap();
        let page = fx.service.before(top, 10).await.unwrap();
        assert_eq!(page.len(), 4);
        assert!(page.iter().all(|m| m.seq.unwrap() < top));

        // An undrained send is invisible to pagination.
        fx.service.send(user, "alice", "pending").await.unwrap();
        let page = fx.service.before(top, 10).await.unwrap();
        assert_eq!(page.len(), 4);
    }
}
