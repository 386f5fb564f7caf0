//! Paginated Message History
//!
//! Pagination runs strictly against the long-term store: a client pages
//! backward from the smallest positive sequence number it has seen. Live
//! messages without a sequence yet are not reachable here by design.

use crate::error::ApiError;
use crate::middleware::AuthContext;
use crate::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use chathouse_core::Message;
use serde_json::{json, Value};

/// Page size for history reads.
pub const PAGE_LIMIT: u32 = 50;

/// GET /api/messages/before/:seq
pub async fn get_before(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(seq): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let messages = state.service.before(seq, PAGE_LIMIT).await?;
    let is_moderator = auth.is_moderator();

    let items: Vec<Value> = messages
        .iter()
        .map(|message| message_json(message, is_moderator))
        .collect();

    Ok(Json(json!({
        "messages": items,
        "count": items.len(),
        "has_more": messages.len() as u32 == PAGE_LIMIT,
    })))
}

/// History representation of a message, with tombstoned content masked for
/// non-moderators and deletion metadata exposed to moderators.
fn message_json(message: &Message, is_moderator: bool) -> Value {
    let mut body = json!({
        "id": message.seq.unwrap_or(0),
        "message_id": message.message_id,
        "user_id": message.user_id,
        "username": message.username,
        "content": message.visible_content(is_moderator),
        "timestamp": message.created_at.to_rfc3339(),
        "deleted": message.is_deleted(),
        "deleted_by_admin": message.deleted_by_moderator,
    });

    if is_moderator && message.is_deleted() {
        body["deleted_by"] = json!(message.deleted_by);
        body["deleted_at"] = json!(message.deleted_at.map(|t| t.to_rfc3339()));
    }

    body
}
