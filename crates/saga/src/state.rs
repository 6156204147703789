//! Saga state derived from the log.

use serde::{Deserialize, Serialize};

use crate::log::{EntryType, SagaLogEntry, StepStatus};
use crate::order_fulfillment::{STEP_COMPLETE, STEP_RELEASE_INVENTORY};

/// Where a saga stands, as read from its log.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          └──► Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// No entries yet.
    #[default]
    NotStarted,

    /// Commands issued, no failure seen.
    Running,

    /// A step reported FAILED; compensation is outstanding.
    Compensating,

    /// `complete` was confirmed (terminal).
    Completed,

    /// Compensation finished after a failure (terminal).
    Failed,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
        }
    }

    /// The state after `entry` is appended. Terminal states are sticky.
    pub fn next(self, entry: &SagaLogEntry) -> SagaState {
        if self.is_terminal() {
            return self;
        }
        if entry.entry_type != EntryType::Event {
            return self.progressed();
        }

        match (entry.step.as_str(), entry.status) {
            (_, StepStatus::Failed) => SagaState::Compensating,
            (STEP_COMPLETE, StepStatus::Confirmed) => SagaState::Completed,
            (STEP_RELEASE_INVENTORY, StepStatus::Compensated)
                if self == SagaState::Compensating =>
            {
                SagaState::Failed
            }
            _ => self.progressed(),
        }
    }

    // Compensating is never undone by a later non-failure entry.
    fn progressed(self) -> SagaState {
        match self {
            SagaState::Compensating => self,
            _ => SagaState::Running,
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
