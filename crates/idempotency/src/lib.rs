//! Dedup guard for consumers of at-least-once deliveries.

pub mod error;
pub mod guard;
pub mod memory;
pub mod postgres;

pub use error::{IdempotencyError, Result};
pub use guard::IdempotencyGuard;
pub use memory::InMemoryIdempotencyGuard;
pub use postgres::PostgresIdempotencyGuard;
