//! Store Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Unique-constraint violation surfaced as a typed conflict so callers
    /// can map it to a client error instead of an internal fault.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}
