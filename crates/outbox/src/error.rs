use thiserror::Error;

use crate::message::{OutboxId, OutboxStatus};

/// Errors that can occur when interacting with the outbox store.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The requested outbox row does not exist.
    #[error("Outbox message not found: {0}")]
    NotFound(OutboxId),

    /// The row is not in a status that allows the requested operation.
    #[error("Outbox message {id} is {status}, operation not allowed")]
    InvalidState { id: OutboxId, status: OutboxStatus },

    /// The row left IN_PROGRESS before this worker recorded its outcome,
    /// e.g. another worker reclaimed a stale claim and finished first.
    #[error("Claim on outbox message {id} lost, row is {status}")]
    ClaimLost { id: OutboxId, status: OutboxStatus },

    /// A status column held a value outside the known set.
    #[error("Unknown outbox status: {0}")]
    UnknownStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for outbox store operations.
pub type Result<T> = std::result::Result<T, OutboxError>;

/// Failure reported by a delivery handler.
///
/// Every variant is treated as transient by the worker: the row is moved to
/// RETRYING until the retry limit is reached, then to FAILED.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The transport could not complete the call (connect, timeout, I/O).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote end answered with a status that warrants a retry.
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// No handler is registered for the message topic.
    #[error("No delivery handler registered for topic '{0}'")]
    NoRoute(String),

    /// The handler refused the message.
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}
