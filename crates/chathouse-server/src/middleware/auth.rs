//! Token Authentication Middleware
//!
//! Validates the session token from the `Authorization: Bearer` header or
//! the `token` cookie and binds the authenticated identity into request
//! extensions as [`AuthContext`]. For upgraded sessions the binding is
//! captured once at connect; inbound frames are not re-authenticated.
//!
//! The moderator variant additionally requires the moderator role.

use crate::auth::jwt;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chathouse_core::Role;
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;
use uuid::Uuid;

/// Identity and role bound to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl AuthContext {
    pub fn is_moderator(&self) -> bool {
        self.role.is_moderator()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequiredRole {
    Member,
    Moderator,
}

/// Authentication layer for protected routes.
#[derive(Clone)]
pub struct AuthLayer {
    secret: Arc<str>,
    required: RequiredRole,
}

impl AuthLayer {
    /// Any authenticated user.
    pub fn new(secret: String) -> Self {
        Self {
            secret: secret.into(),
            required: RequiredRole::Member,
        }
    }

    /// Moderators only.
    pub fn moderator(secret: String) -> Self {
        Self {
            secret: secret.into(),
            required: RequiredRole::Moderator,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            secret: self.secret.clone(),
            required: self.required,
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    secret: Arc<str>,
    required: RequiredRole,
}

impl<S> Service<Request> for AuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let secret = self.secret.clone();
        let required = self.required;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let token = match extract_token(request.headers()) {
                Some(token) => token,
                None => return Ok(unauthorized("authorization required")),
            };

            let claims = match jwt::validate_token(&token, &secret) {
                Ok(claims) => claims,
                Err(e) => {
                    debug!(error = %e, "token rejected");
                    return Ok(unauthorized("invalid or expired token"));
                }
            };

            let user_id = match Uuid::parse_str(&claims.sub) {
                Ok(id) => id,
                Err(_) => return Ok(unauthorized("invalid or expired token")),
            };

            if required == RequiredRole::Moderator && !claims.role.is_moderator() {
                return Ok((
                    StatusCode::FORBIDDEN,
                    Json(json!({ "error": "moderator access required" })),
                )
                    .into_response());
            }

            request.extensions_mut().insert(AuthContext {
                user_id,
                username: claims.username,
                email: claims.email,
                role: claims.role,
            });

            inner.call(request).await
        })
    }
}

/// Token from the `Authorization` header, falling back to the `token`
/// cookie set by login.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())?
        .split(';')
        .filter_map(|pair| pair.trim().strip_prefix("token="))
        .map(|token| token.to_string())
        .next()
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": message })),
    )
        .into_response()
}
