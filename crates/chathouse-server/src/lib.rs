//! chathouse Server
//!
//! Single-node real-time broadcast chat: authenticated clients upgrade to a
//! WebSocket session, publish to one global room, and observe everyone
//! else's messages in near real time. The send path is durability-first:
//! append-log fsync before acknowledgement, periodic batched persistence
//! into the long-term store, log compaction after each successful drain.
//!
//! Request flow:
//!
//! ```text
//! client ──▶ CORS ──▶ security headers ──▶ admission (ban + rate limit)
//!        ──▶ auth (token) ──▶ handler
//! ```
//!
//! Everything is instantiated once at startup and passed explicitly through
//! [`AppState`]; the process-wide tracing subscriber is the only global.

use axum::routing::{get, post};
use axum::{Json, Router};
use chathouse_store::{SideStore, UserStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod service;

pub use config::Config;
pub use error::ApiError;
pub use registry::SessionRegistry;
pub use service::{BroadcastFn, MessageService, ServiceError};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserStore>,
    pub side: Arc<dyn SideStore>,
    pub service: Arc<MessageService>,
    pub registry: Arc<SessionRegistry>,
}

/// Assemble the full router: public auth routes, authenticated member
/// routes, moderator routes, all behind admission control, security headers
/// and CORS.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/api/auth/register", post(auth::handlers::register))
        .route("/api/auth/login", post(auth::handlers::login));

    let member_routes = Router::new()
        .route("/api/ws", get(handlers::ws::websocket))
        .route("/api/messages/before/:seq", get(handlers::messages::get_before))
        .layer(middleware::AuthLayer::new(state.config.jwt_secret.clone()));

    let admin_routes = Router::new()
        .route("/api/admin/users", get(handlers::admin::list_users))
        .route("/api/admin/ban", post(handlers::admin::ban_user))
        .route("/api/admin/ban-bulk", post(handlers::admin::ban_bulk))
        .layer(middleware::AuthLayer::moderator(state.config.jwt_secret.clone()));

    Router::new()
        .merge(auth_routes)
        .merge(member_routes)
        .merge(admin_routes)
        .route("/health", get(health))
        .layer(middleware::AdmissionLayer::new(
            state.side.clone(),
            state.config.rate_limit_max_requests,
            state.config.rate_limit_window,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::security::security_headers,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
