//! Append-only saga log.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SagaId, StepId};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::Result;

/// Whether an entry records something the orchestrator asked for or
/// something a participant reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Command,
    Event,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Command => "COMMAND",
            EntryType::Event => "EVENT",
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "COMMAND" => Ok(EntryType::Command),
            "EVENT" => Ok(EntryType::Event),
            other => Err(SagaError::UnknownValue {
                field: "type",
                value: other.to_string(),
            }),
        }
    }
}

/// Status carried by a saga log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Confirmed,
    Failed,
    Compensated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Confirmed => "CONFIRMED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensated => "COMPENSATED",
        }
    }

    /// Returns true if an EVENT with this status means the step took effect.
    pub fn is_applied(&self) -> bool {
        matches!(self, StepStatus::Confirmed | StepStatus::Compensated)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(StepStatus::Pending),
            "CONFIRMED" => Ok(StepStatus::Confirmed),
            "FAILED" => Ok(StepStatus::Failed),
            "COMPENSATED" => Ok(StepStatus::Compensated),
            other => Err(SagaError::UnknownValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// An entry to append; id and timestamp are assigned by the log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSagaLogEntry {
    pub saga_id: SagaId,
    pub step: String,
    pub step_id: Option<StepId>,
    pub entry_type: EntryType,
    pub payload: serde_json::Value,
    pub status: StepStatus,
    pub error: Option<String>,
}

impl NewSagaLogEntry {
    /// A PENDING command entry.
    pub fn command(
        saga_id: SagaId,
        step: impl Into<String>,
        step_id: Option<StepId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            saga_id,
            step: step.into(),
            step_id,
            entry_type: EntryType::Command,
            payload,
            status: StepStatus::Pending,
            error: None,
        }
    }

    /// An event entry with the given outcome.
    pub fn event(
        saga_id: SagaId,
        step: impl Into<String>,
        step_id: Option<StepId>,
        payload: serde_json::Value,
        status: StepStatus,
    ) -> Self {
        Self {
            saga_id,
            step: step.into(),
            step_id,
            entry_type: EntryType::Event,
            payload,
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A persisted saga log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaLogEntry {
    pub id: i64,
    pub saga_id: SagaId,
    pub step: String,
    pub step_id: Option<StepId>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub payload: serde_json::Value,
    pub status: StepStatus,
    pub ts: DateTime<Utc>,
    pub error: Option<String>,
}

impl SagaLogEntry {
    pub fn is_event(&self) -> bool {
        self.entry_type == EntryType::Event
    }
}

/// Storage for saga log entries.
///
/// Entries are never updated or deleted. Reading a saga's entries in id
/// order reconstructs its timeline.
#[async_trait]
pub trait SagaLog: Send + Sync {
    /// Appends an entry and returns it as stored.
    async fn append(&self, entry: NewSagaLogEntry) -> Result<SagaLogEntry>;

    /// All entries for a saga, oldest first.
    async fn entries(&self, saga_id: SagaId) -> Result<Vec<SagaLogEntry>>;

    /// Returns true if an EVENT for this step id is CONFIRMED or COMPENSATED.
    async fn is_step_applied(&self, saga_id: SagaId, step_id: StepId) -> Result<bool>;
}

#[async_trait]
impl<T: SagaLog + ?Sized> SagaLog for std::sync::Arc<T> {
    async fn append(&self, entry: NewSagaLogEntry) -> Result<SagaLogEntry> {
        (**self).append(entry).await
    }

    async fn entries(&self, saga_id: SagaId) -> Result<Vec<SagaLogEntry>> {
        (**self).entries(saga_id).await
    }

    async fn is_step_applied(&self, saga_id: SagaId, step_id: StepId) -> Result<bool> {
        (**self).is_step_applied(saga_id, step_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            StepStatus::Pending,
            StepStatus::Confirmed,
            StepStatus::Failed,
            StepStatus::Compensated,
        ] {
            assert_eq!(status.as_str().parse::<StepStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<StepStatus>().is_err());
    }

    #[test]
    fn entry_type_strings_roundtrip() {
        assert_eq!("COMMAND".parse::<EntryType>().unwrap(), EntryType::Command);
        assert_eq!("EVENT".parse::<EntryType>().unwrap(), EntryType::Event);
        assert!("command".parse::<EntryType>().is_err());
    }

    #[test]
    fn applied_statuses() {
        assert!(StepStatus::Confirmed.is_applied());
        assert!(StepStatus::Compensated.is_applied());
        assert!(!StepStatus::Pending.is_applied());
        assert!(!StepStatus::Failed.is_applied());
    }

    #[test]
    fn entry_serializes_with_column_names() {
        let entry = SagaLogEntry {
            id: 7,
            saga_id: SagaId::new(),
            step: "reserve_inventory".to_string(),
            step_id: Some(StepId::new()),
            entry_type: EntryType::Command,
            payload: serde_json::json!({ "items": ["SKU1"] }),
            status: StepStatus::Pending,
            ts: Utc::now(),
            error: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "COMMAND");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["saga_id"], entry.saga_id.to_string());
        assert_eq!(json["step_id"], entry.step_id.unwrap().to_string());
    }

    #[test]
    fn event_builder_sets_error() {
        let entry = NewSagaLogEntry::event(
            SagaId::new(),
            "charge_payment",
            None,
            serde_json::json!({ "success": false }),
            StepStatus::Failed,
        )
        .with_error("forced");

        assert_eq!(entry.entry_type, EntryType::Event);
        assert_eq!(entry.error.as_deref(), Some("forced"));
    }
}
