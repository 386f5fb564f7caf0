//! Error Types for chathouse Core
//!
//! Validation failures on user-supplied message content. These map to the
//! "input error" class of the service: they are surfaced to clients as a
//! typed error acknowledgement and are not retryable without modification.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("message cannot be empty")]
    ContentEmpty,

    #[error("message too long (max {max} characters)")]
    ContentTooLong { max: usize },
}
