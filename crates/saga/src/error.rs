//! Saga error types.

use idempotency::IdempotencyError;
use outbox::OutboxError;
use thiserror::Error;

/// Errors that can occur during saga operations.
///
/// Business failures (a declined reservation or charge) are not errors; they
/// are recorded as FAILED log entries and reported through
/// [`ParticipantOutcome`](crate::ParticipantOutcome).
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga log column held a value outside the known set.
    #[error("Unknown {field} value in saga log: {value}")]
    UnknownValue { field: &'static str, value: String },

    /// Publishing a command to the outbox failed.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Reading or writing processed events failed.
    #[error("Idempotency error: {0}")]
    Idempotency(#[from] IdempotencyError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
