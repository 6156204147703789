//! Shared identifier types.

pub mod types;

pub use types::{InvalidId, SagaId, StepId};
