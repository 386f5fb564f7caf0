//! User and Role Types
//!
//! A user account with a denormalized role. The role captured when a session
//! is opened stays fixed for the lifetime of that session; role changes
//! require a reconnect.
//!
//! Soft deletion doubles as the ban mechanism: a soft-deleted user keeps
//! their historical messages visible but can no longer open new sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization role attached to a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Moderator,
}

impl Role {
    pub fn is_moderator(&self) -> bool {
        matches!(self, Role::Moderator)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Moderator => "moderator",
        }
    }

    /// Parse a role from its stored string form. Unknown values fall back to
    /// `Member` so a corrupted row can never grant privileges.
    pub fn parse(value: &str) -> Role {
        match value {
            "moderator" => Role::Moderator,
            _ => Role::Member,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Member
    }
}

/// A registered user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Argon2id hash in PHC string format. Never serialized into responses.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker; a set value means the account is banned.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
