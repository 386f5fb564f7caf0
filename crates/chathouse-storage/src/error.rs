//! Storage Error Types
//!
//! Failures from the append log. A failed append or sync means the message
//! was never accepted; the caller must surface the failure to the sender.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
