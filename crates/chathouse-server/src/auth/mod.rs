//! Authentication: token issuance/validation, password hashing, handlers.

pub mod handlers;
pub mod jwt;
pub mod password;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("failed to issue token: {0}")]
    Issue(String),

    #[error("failed to hash password: {0}")]
    Hash(String),
}
