//! Outbox-driven saga orchestration for order fulfillment.
//!
//! The orchestrator publishes each step command to the outbox and records
//! it in an append-only saga log. Participants (here, mock inventory and
//! payment services) receive the delivered commands and report outcomes
//! back as log events:
//!
//! 1. Reserve inventory
//! 2. Charge payment
//! 3. Complete, or release inventory if the charge is declined
//!
//! A saga's state is never stored; [`SagaInstance`] folds it from the log.

pub mod aggregate;
pub mod error;
pub mod log;
pub mod memory;
pub mod orchestrator;
pub mod order_fulfillment;
pub mod participants;
pub mod postgres;
pub mod state;

pub use aggregate::SagaInstance;
pub use error::{Result, SagaError};
pub use log::{EntryType, NewSagaLogEntry, SagaLog, SagaLogEntry, StepStatus};
pub use memory::InMemorySagaLog;
pub use orchestrator::SagaOrchestrator;
pub use participants::{InventoryParticipant, ParticipantOutcome, PaymentParticipant, StepRequest};
pub use postgres::PostgresSagaLog;
pub use state::SagaState;
