//! Transactional outbox.
//!
//! Business code enqueues messages with [`OutboxPublisher`]; an
//! [`OutboxWorker`] later claims them with a locked select, hands each to a
//! [`DeliveryHandler`] and records SENT, RETRYING (with exponential backoff)
//! or FAILED. Delivery is at-least-once.

pub mod backoff;
pub mod error;
pub mod handler;
pub mod memory;
pub mod message;
pub mod pool;
pub mod postgres;
pub mod publisher;
pub mod store;
pub mod worker;

pub use backoff::RetryPolicy;
pub use error::{DeliveryError, OutboxError, Result};
pub use handler::{DeliveryHandler, HttpDeliveryHandler, TopicRouter};
pub use memory::InMemoryOutboxStore;
pub use message::{NewOutboxMessage, OutboxId, OutboxMessage, OutboxStatus};
pub use pool::WorkerPool;
pub use postgres::{PostgresOutboxStore, enqueue, run_migrations};
pub use publisher::{MessageSink, OutboxPublisher};
pub use store::{ClaimOptions, OutboxStore};
pub use worker::{AppliedSteps, LookupError, OutboxWorker, WorkerConfig};
