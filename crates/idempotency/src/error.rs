use thiserror::Error;

/// Errors that can occur when reading or writing processed events.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for idempotency guard operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;
