//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod participants;
pub mod sagas;
