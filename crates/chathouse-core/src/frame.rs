//! WebSocket Wire Frames
//!
//! JSON frames exchanged over a streaming session, tagged by a `type` field.
//!
//! Client to server:
//! - `{"type":"send_message","temp_id":"...","content":"..."}`
//! - `{"type":"delete_message","message_id":"..."}`
//!
//! Server to client: `message`, `ack`, `message_deleted`, `error` and
//! `session_expired` (followed by a normal-closure close frame).

use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Frames a client may send over an established session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        #[serde(default)]
        temp_id: String,
        content: String,
    },
    DeleteMessage {
        message_id: String,
    },
}

/// Frames the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Message {
        /// Internal sequence number, `0` for messages not yet drained into
        /// the long-term store.
        id: i64,
        message_id: String,
        user_id: String,
        username: String,
        content: String,
        /// RFC 3339 creation timestamp.
        timestamp: String,
        deleted: bool,
        deleted_by_admin: bool,
    },
    Ack {
        temp_id: String,
        /// Empty on an error acknowledgement.
        message_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    MessageDeleted {
        message_id: String,
        deleted_by_admin: bool,
    },
    Error {
        error: String,
    },
    SessionExpired {
        error: String,
    },
}

impl ServerFrame {
    /// Build a `message` frame as seen by a viewer. Tombstoned content is
    /// masked unless the viewer is a moderator.
    pub fn from_message(msg: &Message, viewer_is_moderator: bool) -> Self {
        ServerFrame::Message {
            id: msg.seq.unwrap_or(0),
            message_id: msg.message_id.to_string(),
            user_id: msg.user_id.to_string(),
            username: msg.username.clone(),
            content: msg.visible_content(viewer_is_moderator).to_string(),
            timestamp: msg.created_at.to_rfc3339(),
            deleted: msg.is_deleted(),
            deleted_by_admin: msg.deleted_by_moderator,
        }
    }

    pub fn ack_success(temp_id: &str, message_id: &str) -> Self {
        ServerFrame::Ack {
            temp_id: temp_id.to_string(),
            message_id: message_id.to_string(),
            status: "success".to_string(),
            error: None,
        }
    }

    pub fn ack_error(temp_id: &str, error: impl Into<String>) -> Self {
        ServerFrame::Ack {
            temp_id: temp_id.to_string(),
            message_id: String::new(),
            status: "error".to_string(),
            error: Some(error.into()),
        }
    }
}
