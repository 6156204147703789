//! Saga instance view folded from the log.

use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::log::{EntryType, SagaLogEntry, StepStatus};
use crate::order_fulfillment::{STEP_COMPLETE, STEP_START};
use crate::state::SagaState;

/// A saga as reconstructed from its log entries.
///
/// Not persisted: rebuilt on every read by applying entries in id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    saga_id: SagaId,
    state: SagaState,
    /// Steps with a CONFIRMED or COMPENSATED event, in the order seen.
    confirmed_steps: Vec<String>,
    failure_reason: Option<String>,
    items: Vec<String>,
    amount: f64,
    entry_count: usize,
}

impl SagaInstance {
    fn new(saga_id: SagaId) -> Self {
        Self {
            saga_id,
            state: SagaState::NotStarted,
            confirmed_steps: Vec::new(),
            failure_reason: None,
            items: Vec::new(),
            amount: 0.0,
            entry_count: 0,
        }
    }

    /// Folds a saga's entries. Returns `None` for an empty log.
    pub fn from_entries(entries: &[SagaLogEntry]) -> Option<Self> {
        let first = entries.first()?;
        let mut saga = Self::new(first.saga_id);
        for entry in entries {
            saga.apply(entry);
        }
        Some(saga)
    }

    /// Applies one entry.
    pub fn apply(&mut self, entry: &SagaLogEntry) {
        self.state = self.state.next(entry);
        self.entry_count += 1;

        if entry.entry_type == EntryType::Command && entry.step == STEP_START {
            if let Some(items) = entry.payload.get("items").and_then(|v| v.as_array()) {
                self.items = items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect();
            }
            self.amount = entry
                .payload
                .get("amount")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            return;
        }

        if entry.entry_type != EntryType::Event {
            return;
        }
        match entry.status {
            StepStatus::Confirmed | StepStatus::Compensated if entry.step != STEP_COMPLETE => {
                self.confirmed_steps.push(entry.step.clone());
            }
            StepStatus::Failed => {
                self.failure_reason = Some(
                    entry
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("{} failed", entry.step)),
                );
            }
            _ => {}
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns the list of confirmed step names.
    pub fn confirmed_steps(&self) -> &[String] {
        &self.confirmed_steps
    }

    /// Returns the failure reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Items from the `start` entry.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Amount from the `start` entry.
    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }
}
