//! Session Registry
//!
//! The in-memory broadcast fabric: a map of every live session guarded by a
//! readers-writer lock. Broadcast takes the shared lock; register and
//! unregister take the exclusive lock.
//!
//! ## Non-blocking broadcast
//!
//! Each session owns a **bounded outbound queue**. Broadcast `try_send`s
//! into every queue and never waits: a full queue means the peer is too
//! slow, the frame is dropped for that peer, and the peer's own tasks tear
//! the session down when its socket stalls past the write deadline. The
//! shared lock is therefore held only for the cheap queue handoff, never
//! for socket I/O.
//!
//! ## Session lifecycle
//!
//! A session is created on a successful authenticated upgrade and destroyed
//! when the client disconnects, misses the heartbeat, or reaches the
//! absolute session lifetime. The per-session reader/writer/heartbeat tasks
//! live in the WebSocket handler; the registry only tracks membership and
//! routes frames.

use chathouse_core::{Role, ServerFrame};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Read deadline: a session that produces no inbound traffic (including
/// heartbeat replies) for this long is considered dead.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Heartbeat period: PONG_TIMEOUT * 0.9.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(54);

/// Deadline for a single outbound socket write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Absolute session lifetime; expiry is announced with a `session_expired`
/// frame followed by a close frame.
pub const SESSION_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Per-session outbound queue depth. Deep enough to absorb a burst of
/// broadcasts while the writer drains; a peer that stays behind loses
/// frames instead of stalling the broadcaster.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Opaque handle for a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What travels through a session's outbound queue.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    Ping,
    Close { reason: String },
}

struct SessionHandle {
    username: String,
    #[allow(dead_code)]
    user_id: Uuid,
    #[allow(dead_code)]
    role: Role,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Outbound>,
}

/// Registry of live sessions.
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a session and hand back its id, a sender for session-local
    /// traffic (acks, backfill) and the receiver the writer task drains.
    pub fn register(
        &self,
        user_id: Uuid,
        username: String,
        role: Role,
    ) -> (SessionId, mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.insert(
            id,
            SessionHandle {
                username: username.clone(),
                user_id,
                role,
                connected_at: Utc::now(),
                outbound: tx.clone(),
            },
        );
        let total = sessions.len();
        drop(sessions);

        info!(session = %id, user = %username, total, "session registered");
        (id, tx, rx)
    }

    /// Remove a session. Dropping the registry's sender (together with the
    /// handler's own) closes the outbound queue and lets the writer finish.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);

        match removed {
            Some(handle) => {
                let connected_secs = (Utc::now() - handle.connected_at).num_seconds();
                info!(
                    session = %id,
                    user = %handle.username,
                    connected_secs,
                    remaining = self.count(),
                    "session unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Fan a frame out to every live session without blocking on any of
    /// them. Returns how many queues accepted the frame.
    pub fn broadcast(&self, frame: &ServerFrame) -> usize {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut delivered = 0;
        for (id, session) in sessions.iter() {
            match session.outbound.try_send(Outbound::Frame(frame.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        session = %id,
                        user = %session.username,
                        "outbound queue full, dropping frame for slow session"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Session is tearing down; its own handler unregisters.
                    debug!(session = %id, "outbound queue closed");
                }
            }
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
