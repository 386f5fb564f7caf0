//! Registration and Login Handlers
//!
//! Successful authentication sets the session token in an HttpOnly cookie
//! (SameSite=Lax, Secure in production) and returns the user without the
//! token in the body.

use crate::auth::{jwt, password};
use crate::error::ApiError;
use crate::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chathouse_core::{Role, User};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// Cookie lifetime: 7 days.
const COOKIE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    validate_register(&req)?;

    if state.users.get_by_email(&req.email).await?.is_some() {
        warn!(email = %req.email, "registration rejected: email already exists");
        return Err(ApiError::BadRequest("email already exists".to_string()));
    }
    if state.users.get_by_username(&req.username).await?.is_some() {
        warn!(username = %req.username, "registration rejected: username already exists");
        return Err(ApiError::BadRequest("username already exists".to_string()));
    }

    let user = User {
        id: Uuid::new_v4(),
        username: req.username,
        email: req.email,
        password_hash: password::hash_password(&req.password)?,
        role: Role::Member,
        created_at: Utc::now(),
        deleted_at: None,
    };
    state.users.create_user(&user).await?;

    let token = jwt::generate_token(&user, &state.config.jwt_secret, state.config.jwt_expiry)?;

    info!(user_id = %user.id, username = %user.username, "user registered");

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, auth_cookie(&token, state.config.environment.is_production()))],
        Json(json!({
            "message": "User registered successfully",
            "user": user_body(&user),
        })),
    )
        .into_response())
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    // A soft-deleted account does not resolve here, so banned users cannot
    // log back in.
    let user = match state.users.get_by_email(&req.email).await? {
        Some(user) => user,
        None => {
            warn!(email = %req.email, "login failed: user not found");
            return Err(ApiError::Unauthorized("invalid credentials".to_string()));
        }
    };

    if !password::verify_password(&req.password, &user.password_hash) {
        warn!(user_id = %user.id, "login failed: invalid password");
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }

    let token = jwt::generate_token(&user, &state.config.jwt_secret, state.config.jwt_expiry)?;

    info!(user_id = %user.id, username = %user.username, role = user.role.as_str(), "user logged in");

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, auth_cookie(&token, state.config.environment.is_production()))],
        Json(json!({
            "message": "Login successful",
            "user": user_body(&user),
        })),
    )
        .into_response())
}

fn user_body(user: &User) -> serde_json::Value {
    json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "role": user.role,
    })
}

fn auth_cookie(token: &str, production: bool) -> String {
    let mut cookie = format!(
        "token={token}; Path=/; Max-Age={COOKIE_MAX_AGE_SECS}; HttpOnly; SameSite=Lax"
    );
    if production {
        cookie.push_str("; Secure");
    }
    cookie
}

fn validate_register(req: &RegisterRequest) -> Result<(), ApiError> {
    if req.username.len() < 3 {
        return Err(ApiError::BadRequest(
            "username must be at least 3 characters".to_string(),
        ));
    }
    if req.username.len() > 50 {
        return Err(ApiError::BadRequest(
            "username must be at most 50 characters".to_string(),
        ));
    }
    if !valid_email(&req.email) || req.email.len() > 100 {
        return Err(ApiError::BadRequest("invalid email format".to_string()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "password must be at least 8 characters".to_string(),
        ));
    }
    if req.password.len() > 128 {
        return Err(ApiError::BadRequest("password too long".to_string()));
    }
    Ok(())
}

fn valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty()
        && tld.len() >= 2
        && !email.contains(char::is_whitespace)
        && !domain.contains('@')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, pass: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: pass.to_string(),
        }
    }

    #[test]
    fn test_valid_email() {
        assert!(valid_email("alice@example.com"));
        assert!(valid_email("a.b+c@mail.example.org"));
        assert!(!valid_email("alice"));
        assert!(!valid_email("alice@"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("alice@example"));
        assert!(!valid_email("alice@exa mple.com"));
        assert!(!valid_email("alice@ex@ample.com"));
    }

    #[test]
    fn test_validate_register_bounds() {
        assert!(validate_register(&request("alice", "alice@example.com", "password123")).is_ok());
        assert!(validate_register(&request("al", "alice@example.com", "password123")).is_err());
        assert!(validate_register(&request(&"a".repeat(51), "alice@example.com", "password123"))
            .is_err());
        assert!(validate_register(&request("alice", "nonsense", "password123")).is_err());
        assert!(validate_register(&request("alice", "alice@example.com", "short")).is_err());
        assert!(validate_register(&request("alice", "alice@example.com", &"p".repeat(129)))
            .is_err());
    }

    #[test]
    fn test_auth_cookie_flags() {
        let dev = auth_cookie("tok", false);
        assert!(dev.contains("token=tok"));
        assert!(dev.contains("HttpOnly"));
        assert!(dev.contains("SameSite=Lax"));
        assert!(!dev.contains("Secure"));

        let prod = auth_cookie("tok", true);
        assert!(prod.ends_with("; Secure"));
    }
}
