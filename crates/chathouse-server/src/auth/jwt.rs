//! JWT Session Tokens
//!
//! HS256 tokens binding `(user id, username, email, role)` for the token
//! lifetime. The role in the claims is the role a session runs with until
//! reconnect; role changes take effect on the next login.

use crate::auth::AuthError;
use chathouse_core::{Role, User};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    /// Issued at (Unix timestamp).
    pub iat: u64,
    /// Expiration time (Unix timestamp).
    pub exp: u64,
}

/// Issue a token for `user` valid for `expires_in`.
pub fn generate_token(
    user: &User,
    secret: &str,
    expires_in: Duration,
) -> Result<String, AuthError> {
    let now = Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: user.id.to_string(),
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role,
        iat: now,
        exp: now + expires_in.as_secs(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Issue(e.to_string()))
}

/// Validate a token's signature and expiry and return its claims.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
        _ => AuthError::InvalidToken,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const SECRET: &str = "test-secret-test-secret-test-secret";

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            role,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let u = user(Role::Moderator);
        let token = generate_token(&u, SECRET, Duration::from_secs(3600)).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();

        assert_eq!(claims.sub, u.id.to_string());
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.role, Role::Moderator);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = generate_token(&user(Role::Member), SECRET, Duration::from_secs(3600)).unwrap();
        assert!(matches!(
            validate_token(&token, "another-secret-another-secret"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        // Craft a token whose expiry is beyond the default validation leeway.
        let now = Utc::now().timestamp() as u64;
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            role: Role::Member,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            validate_token(&token, SECRET),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            validate_token("not-a-token", SECRET),
            Err(AuthError::InvalidToken)
        ));
    }
}
