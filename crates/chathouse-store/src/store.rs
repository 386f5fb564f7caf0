//! Store Traits
//!
//! Three narrow interfaces over the shared database, split along ownership
//! lines: messages are written by the batch drainer and read by everyone,
//! users by the auth and admin paths, and the side store by the admission
//! layer. One backend implements all three over a single pool.

use crate::error::Result;
use async_trait::async_trait;
use chathouse_core::{Message, User};
use std::time::Duration;
use uuid::Uuid;

/// Queryable archive of drained messages; source of truth for pagination
/// and for tombstone state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a batch in order. Idempotent on the stable identifier:
    /// duplicates from a drainer re-run must not create rows.
    async fn batch_insert(&self, messages: &[Message]) -> Result<()>;

    /// The newest `limit` messages, newest first.
    async fn get_recent(&self, limit: u32) -> Result<Vec<Message>>;

    /// A contiguous window of messages with internal sequence strictly below
    /// `seq`, newest first.
    async fn get_before(&self, seq: i64, limit: u32) -> Result<Vec<Message>>;

    async fn get_by_message_id(&self, message_id: Uuid) -> Result<Option<Message>>;

    /// Tombstone a message. Idempotent: a repeated delete keeps the original
    /// deletion metadata.
    async fn soft_delete(
        &self,
        message_id: Uuid,
        deleted_by: Uuid,
        by_moderator: bool,
    ) -> Result<()>;
}

/// User accounts. Lookups used on the auth path exclude soft-deleted
/// (banned) accounts; the admin listing includes them.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn list_all(&self) -> Result<Vec<User>>;
    async fn soft_delete_user(&self, id: Uuid) -> Result<()>;
    async fn bulk_soft_delete(&self, ids: &[Uuid]) -> Result<()>;
}

/// Post-increment view of an admission counter.
#[derive(Debug, Clone, Copy)]
pub struct CounterSample {
    /// Counter value including this increment.
    pub count: u64,
    /// Time until the current window expires.
    pub retry_after: Duration,
}

/// Shared key-value side state consulted by the admission layer on every
/// request. Persisted so bans survive restarts.
#[async_trait]
pub trait SideStore: Send + Sync {
    /// Atomically increment the fixed-window counter for `key`. The first
    /// increment of a window starts its TTL.
    async fn counter_incr(&self, key: &str, window: Duration) -> Result<CounterSample>;

    async fn ban_add(&self, address: &str) -> Result<()>;
    async fn ban_remove(&self, address: &str) -> Result<()>;
    async fn is_banned(&self, address: &str) -> Result<bool>;
}
