//! SQLite Store Implementation
//!
//! Implements the `MessageStore`, `UserStore` and `SideStore` traits over a
//! single SQLite connection pool.
//!
//! ## Why SQLite?
//!
//! For a single-node deployment SQLite is ideal: embedded, zero
//! configuration, ACID, sub-millisecond indexed lookups, and trivially
//! replaced by a server database behind the same traits later.
//!
//! ## Runtime Queries
//!
//! This implementation uses **runtime queries** (`sqlx::query`) instead of
//! compile-time macros (`sqlx::query!`) so the workspace builds without a
//! live `DATABASE_URL`. The trade-off is manual column extraction with
//! `.get()`.
//!
//! ## Idempotency
//!
//! `batch_insert` uses `INSERT OR IGNORE` against the unique index on
//! `message_id`, which is what makes the drainer's retry-after-failure and
//! crash-between-insert-and-compact behavior exactly-once. `soft_delete`
//! uses `COALESCE` so a repeated delete keeps the original deletion
//! metadata.
//!
//! ## Thread Safety
//!
//! `SqliteStore` is `Send + Sync` and is shared via `Arc`; the pool handles
//! concurrent access. In-memory databases for tests are restricted to a
//! single pooled connection, because each new in-memory connection would
//! otherwise see its own empty database.

use crate::{
    error::{Result, StoreError},
    store::{CounterSample, MessageStore, SideStore, UserStore},
};
use async_trait::async_trait;
use chathouse_core::{Message, Role, User};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// SQLite-backed store for messages, users and admission side state.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        // WAL journal mode allows concurrent readers; the busy timeout
        // covers writer contention across pooled connections.
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Open from a `DATABASE_URL`-style value; a bare path is accepted too.
    pub async fn from_url(url: &str) -> Result<Self> {
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        Self::new(path).await
    }

    /// In-memory database for tests.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| StoreError::CorruptRow(format!("invalid uuid: {value}")))
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::CorruptRow(format!("invalid timestamp: {ms}")))
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let message_id: String = row.get("message_id");
    let user_id: String = row.get("user_id");
    let deleted_by: Option<String> = row.get("deleted_by");

    Ok(Message {
        seq: Some(row.get::<i64, _>("id")),
        message_id: parse_uuid(&message_id)?,
        user_id: parse_uuid(&user_id)?,
        username: row.get("username"),
        content: row.get("content"),
        created_at: from_ms(row.get::<i64, _>("created_at"))?,
        deleted_at: row
            .get::<Option<i64>, _>("deleted_at")
            .map(from_ms)
            .transpose()?,
        deleted_by: deleted_by.as_deref().map(parse_uuid).transpose()?,
        deleted_by_moderator: row.get::<bool, _>("deleted_by_moderator"),
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let role: String = row.get("role");

    Ok(User {
        id: parse_uuid(&id)?,
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: Role::parse(&role),
        created_at: from_ms(row.get::<i64, _>("created_at"))?,
        deleted_at: row
            .get::<Option<i64>, _>("deleted_at")
            .map(from_ms)
            .transpose()?,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, message_id, user_id, username, content, created_at, deleted_at, deleted_by, deleted_by_moderator";

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, created_at, deleted_at";

#[async_trait]
impl MessageStore for SqliteStore {
    async fn batch_insert(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for msg in messages {
            // Log entries carry no author name; resolve it from the users
            // table (including soft-deleted authors) when blank.
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO messages
                    (message_id, user_id, username, content, created_at, deleted_at, deleted_by, deleted_by_moderator)
                VALUES (
                    ?, ?,
                    CASE WHEN ? <> '' THEN ?
                         ELSE COALESCE((SELECT username FROM users WHERE id = ?), '')
                    END,
                    ?, ?, ?, ?, ?
                )
                "#,
            )
            .bind(msg.message_id.to_string())
            .bind(msg.user_id.to_string())
            .bind(&msg.username)
            .bind(&msg.username)
            .bind(msg.user_id.to_string())
            .bind(&msg.content)
            .bind(msg.created_at.timestamp_millis())
            .bind(msg.deleted_at.map(|t| t.timestamp_millis()))
            .bind(msg.deleted_by.map(|id| id.to_string()))
            .bind(msg.deleted_by_moderator)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_recent(&self, limit: u32) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY id DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_before(&self, seq: i64, limit: u32) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id < ? ORDER BY id DESC LIMIT ?"
        ))
        .bind(seq)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_by_message_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?"
        ))
        .bind(message_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn soft_delete(
        &self,
        message_id: Uuid,
        deleted_by: Uuid,
        by_moderator: bool,
    ) -> Result<()> {
        // COALESCE keeps the original metadata when the message is already
        // tombstoned, which makes repeated deletes idempotent.
        sqlx::query(
            r#"
            UPDATE messages
            SET deleted_at = COALESCE(deleted_at, ?),
                deleted_by = COALESCE(deleted_by, ?),
                deleted_by_moderator =
                    CASE WHEN deleted_at IS NULL THEN ? ELSE deleted_by_moderator END
            WHERE message_id = ?
            "#,
        )
        .bind(Self::now_ms())
        .bind(deleted_by.to_string())
        .bind(by_moderator)
        .bind(message_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, created_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at.timestamp_millis())
        .bind(user.deleted_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            if e.to_string().contains("UNIQUE constraint failed") {
                return Err(StoreError::Conflict(
                    "username or email already exists".to_string(),
                ));
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ? AND deleted_at IS NULL"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn soft_delete_user(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET deleted_at = COALESCE(deleted_at, ?) WHERE id = ?")
            .bind(Self::now_ms())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bulk_soft_delete(&self, ids: &[Uuid]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Self::now_ms();

        for id in ids {
            sqlx::query("UPDATE users SET deleted_at = COALESCE(deleted_at, ?) WHERE id = ?")
                .bind(now)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SideStore for SqliteStore {
    async fn counter_incr(&self, key: &str, window: Duration) -> Result<CounterSample> {
        let now = Self::now_ms();
        let new_expiry = now + window.as_millis() as i64;

        // Single atomic upsert: an expired window restarts at 1 with a fresh
        // TTL, a live window just increments. The CASE expressions see the
        // pre-update row.
        let row = sqlx::query(
            r#"
            INSERT INTO rate_counters (key, count, expires_at) VALUES (?, 1, ?)
            ON CONFLICT(key) DO UPDATE SET
                count = CASE WHEN rate_counters.expires_at <= ? THEN 1
                             ELSE rate_counters.count + 1 END,
                expires_at = CASE WHEN rate_counters.expires_at <= ? THEN ?
                                  ELSE rate_counters.expires_at END
            RETURNING count, expires_at
            "#,
        )
        .bind(key)
        .bind(new_expiry)
        .bind(now)
        .bind(now)
        .bind(new_expiry)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        let expires_at: i64 = row.get("expires_at");

        Ok(CounterSample {
            count: count.max(0) as u64,
            retry_after: Duration::from_millis((expires_at - now).max(0) as u64),
        })
    }

    async fn ban_add(&self, address: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO banned_addresses (address, created_at) VALUES (?, ?)")
            .bind(address)
            .bind(Self::now_ms())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ban_remove(&self, address: &str) -> Result<()> {
        sqlx::query("DELETE FROM banned_addresses WHERE address = ?")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_banned(&self, address: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(1) AS n FROM banned_addresses WHERE address = ?")
            .bind(address)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: name.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$test".to_string(),
            role: Role::Member,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn message(content: &str) -> Message {
        Message::accepted(Uuid::new_v4(), String::new(), content.to_string())
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_batch_insert_assigns_increasing_sequence() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let batch = vec![message("a"), message("b"), message("c")];
        store.batch_insert(&batch).await.unwrap();

        let recent = store.get_recent(10).await.unwrap();
        assert_eq!(recent.len(), 3);
        // Newest first, strictly decreasing sequence.
        assert_eq!(recent[0].content, "c");
        assert_eq!(recent[2].content, "a");
        assert!(recent[0].seq.unwrap() > recent[1].seq.unwrap());
        assert!(recent[1].seq.unwrap() > recent[2].seq.unwrap());
    }

    #[tokio::test]
    async fn test_batch_insert_is_idempotent_on_message_id() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let batch = vec![message("a"), message("b")];
        store.batch_insert(&batch).await.unwrap();
        store.batch_insert(&batch).await.unwrap();

        assert_eq!(store.get_recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_insert_resolves_username_from_users() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let bob = user("bob", "bob@example.com");
        store.create_user(&bob).await.unwrap();

        let mut msg = message("hi");
        msg.user_id = bob.id;
        store.batch_insert(&[msg]).await.unwrap();

        assert_eq!(store.get_recent(1).await.unwrap()[0].username, "bob");
    }

    #[tokio::test]
    async fn test_batch_insert_resolves_username_of_deleted_author() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let bob = user("bob", "bob@example.com");
        store.create_user(&bob).await.unwrap();
        store.soft_delete_user(bob.id).await.unwrap();

        let mut msg = message("hi");
        msg.user_id = bob.id;
        store.batch_insert(&[msg]).await.unwrap();

        // Messages stay attributed even after the author is banned.
        assert_eq!(store.get_recent(1).await.unwrap()[0].username, "bob");
    }

    #[tokio::test]
    async fn test_get_before_returns_contiguous_window() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let batch: Vec<Message> = (0..10).map(|i| message(&format!("m{}", i))).collect();
        store.batch_insert(&batch).await.unwrap();

        let recent = store.get_recent(1).await.unwrap();
        let top = recent[0].seq.unwrap();

        let page = store.get_before(top, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(page.iter().all(|m| m.seq.unwrap() < top));
        assert_eq!(page[0].seq.unwrap(), top - 1);
        assert_eq!(page[2].seq.unwrap(), top - 3);
    }

    #[tokio::test]
    async fn test_get_before_zero_is_empty() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.batch_insert(&[message("a")]).await.unwrap();
        assert!(store.get_before(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let msg = message("bad");
        let id = msg.message_id;
        store.batch_insert(&[msg]).await.unwrap();

        let author = Uuid::new_v4();
        store.soft_delete(id, author, false).await.unwrap();
        let first = store.get_by_message_id(id).await.unwrap().unwrap();
        assert!(first.is_deleted());
        assert_eq!(first.deleted_by, Some(author));
        assert!(!first.deleted_by_moderator);

        // A later moderator delete must not overwrite the original metadata.
        store.soft_delete(id, Uuid::new_v4(), true).await.unwrap();
        let second = store.get_by_message_id(id).await.unwrap().unwrap();
        assert_eq!(second.deleted_at, first.deleted_at);
        assert_eq!(second.deleted_by, Some(author));
        assert!(!second.deleted_by_moderator);
    }

    #[tokio::test]
    async fn test_get_by_message_id_missing() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        assert!(store
            .get_by_message_id(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_create_and_lookup_user() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let alice = user("alice", "alice@example.com");
        store.create_user(&alice).await.unwrap();

        let by_email = store.get_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, alice.id);
        assert_eq!(by_email.role, Role::Member);

        let by_name = store.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, alice.id);

        assert!(store.get_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_is_conflict() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.create_user(&user("alice", "alice@example.com")).await.unwrap();

        let result = store.create_user(&user("alice", "other@example.com")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let result = store.create_user(&user("other", "alice@example.com")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_soft_deleted_user_hidden_from_auth_lookups() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let alice = user("alice", "alice@example.com");
        store.create_user(&alice).await.unwrap();
        store.soft_delete_user(alice.id).await.unwrap();

        assert!(store.get_by_email("alice@example.com").await.unwrap().is_none());
        assert!(store.get_by_id(alice.id).await.unwrap().is_none());

        // But the admin listing still sees the account.
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_deleted());
    }

    #[tokio::test]
    async fn test_bulk_soft_delete() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let a = user("a", "a@example.com");
        let b = user("b", "b@example.com");
        store.create_user(&a).await.unwrap();
        store.create_user(&b).await.unwrap();

        store.bulk_soft_delete(&[a.id, b.id]).await.unwrap();
        assert!(store.list_all().await.unwrap().iter().all(|u| u.is_deleted()));
    }

    // ---------------------------------------------------------------
    // Side store
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_counter_increments_within_window() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let window = Duration::from_secs(60);

        for expected in 1..=5u64 {
            let sample = store.counter_incr("ratelimit:1.2.3.4", window).await.unwrap();
            assert_eq!(sample.count, expected);
            assert!(sample.retry_after <= window);
        }

        // A different key has its own counter.
        let other = store.counter_incr("ratelimit:5.6.7.8", window).await.unwrap();
        assert_eq!(other.count, 1);
    }

    #[tokio::test]
    async fn test_counter_resets_after_window_expiry() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let window = Duration::from_millis(50);

        store.counter_incr("key", window).await.unwrap();
        store.counter_incr("key", window).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let sample = store.counter_incr("key", window).await.unwrap();
        assert_eq!(sample.count, 1);
    }

    #[tokio::test]
    async fn test_ban_add_remove() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        assert!(!store.is_banned("1.2.3.4").await.unwrap());

        store.ban_add("1.2.3.4").await.unwrap();
        assert!(store.is_banned("1.2.3.4").await.unwrap());

        // Adding twice is fine.
        store.ban_add("1.2.3.4").await.unwrap();

        store.ban_remove("1.2.3.4").await.unwrap();
        assert!(!store.is_banned("1.2.3.4").await.unwrap());
    }
}
