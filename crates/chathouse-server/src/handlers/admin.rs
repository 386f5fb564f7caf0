//! Moderation Endpoints
//!
//! Moderator-only routes: the full user listing (including banned accounts)
//! and user bans. Banning is a soft delete: the account can no longer
//! authenticate or open sessions, but its messages remain attributed.

use crate::error::ApiError;
use crate::middleware::AuthContext;
use crate::AppState;
use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct BanUserRequest {
    pub user_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct BanBulkRequest {
    pub user_ids: Vec<String>,
    pub reason: String,
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Value>, ApiError> {
    info!(moderator = %auth.user_id, "listing all users");

    let users = state.users.list_all().await?;
    Ok(Json(json!({ "users": users })))
}

/// POST /api/admin/ban
pub async fn ban_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<BanUserRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = Uuid::parse_str(&req.user_id)
        .map_err(|_| ApiError::BadRequest("invalid user ID format".to_string()))?;

    info!(
        moderator = %auth.user_id,
        target = %user_id,
        reason = %req.reason,
        "banning user"
    );

    state.users.soft_delete_user(user_id).await?;

    Ok(Json(json!({ "message": "User banned successfully" })))
}

/// POST /api/admin/ban-bulk
pub async fn ban_bulk(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<BanBulkRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut targets = Vec::with_capacity(req.user_ids.len());
    for raw in &req.user_ids {
        match Uuid::parse_str(raw) {
            Ok(id) => targets.push(id),
            Err(_) => {
                // Skip malformed ids rather than failing the whole batch.
                warn!(user_id = %raw, "skipping invalid user ID in bulk ban");
            }
        }
    }

    if targets.is_empty() {
        return Err(ApiError::BadRequest(
            "no valid user IDs provided".to_string(),
        ));
    }

    info!(
        moderator = %auth.user_id,
        count = targets.len(),
        reason = %req.reason,
        "bulk banning users"
    );

    state.users.bulk_soft_delete(&targets).await?;

    Ok(Json(json!({ "message": "Users banned successfully" })))
}
