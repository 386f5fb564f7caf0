//! Message Data Structure
//!
//! This module defines the core `Message` type - the unit of data flowing
//! through the chat pipeline (append log, broadcast fabric, hot cache,
//! long-term store).
//!
//! ## Identifiers
//!
//! Every message carries two identifiers with different lifetimes:
//!
//! - **message_id**: an opaque 128-bit UUID generated server-side the moment
//!   the message is accepted. Stable across log, cache, store and wire.
//! - **seq**: the monotonically increasing internal sequence number assigned
//!   by the long-term store at insertion time. `None` until the drainer
//!   persists the message, which is why freshly broadcast messages appear on
//!   the wire with `id: 0`. Pagination cursors are built from `seq` only.
//!
//! ## Tombstones
//!
//! Deletion is a soft delete: the row is retained and flagged. Non-moderator
//! readers see a canonical placeholder instead of the original content;
//! moderators see the original content plus the deletion metadata.
//!
//! Content is stored HTML-escaped. Consumers must never re-escape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder shown to non-moderators for a user-deleted message.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Placeholder shown to non-moderators for a moderator-deleted message.
pub const DELETED_BY_MODERATOR_PLACEHOLDER: &str = "This message was deleted by admin";

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Internal sequence number, assigned by the store. Absent (and `0` on
    /// the wire) until the message has been drained into the store.
    pub seq: Option<i64>,

    /// Stable identifier, generated at accept time.
    pub message_id: Uuid,

    /// Author identifier.
    pub user_id: Uuid,

    /// Author display name, denormalized so reads survive author deletion.
    pub username: String,

    /// HTML-escaped message text.
    pub content: String,

    /// Server-assigned creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Soft-delete timestamp; set means the message is tombstoned.
    pub deleted_at: Option<DateTime<Utc>>,

    /// Who deleted the message.
    pub deleted_by: Option<Uuid>,

    /// Whether the delete was issued by a moderator.
    pub deleted_by_moderator: bool,
}

impl Message {
    /// Build a freshly accepted message (no sequence, no tombstone).
    pub fn accepted(user_id: Uuid, username: String, content: String) -> Self {
        Self {
            seq: None,
            message_id: Uuid::new_v4(),
            user_id,
            username,
            content,
            created_at: Utc::now(),
            deleted_at: None,
            deleted_by: None,
            deleted_by_moderator: false,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Content as seen by a viewer. Tombstoned content is replaced by the
    /// canonical placeholder for non-moderators; moderators always see the
    /// original text.
    pub fn visible_content(&self, viewer_is_moderator: bool) -> &str {
        if self.is_deleted() && !viewer_is_moderator {
            if self.deleted_by_moderator {
                DELETED_BY_MODERATOR_PLACEHOLDER
            } else {
                DELETED_PLACEHOLDER
            }
        } else {
            &self.content
        }
    }
}
