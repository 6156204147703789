use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{SagaId, StepId};
use serde::{Deserialize, Serialize};

use crate::error::OutboxError;

/// Identifier of an outbox row, assigned by the store on insert.
///
/// Ids increase monotonically, so ordering by id is insertion order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OutboxId(i64);

impl OutboxId {
    /// Creates an outbox ID from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OutboxId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Delivery status of an outbox row.
///
/// ```text
/// PENDING ──► IN_PROGRESS ──┬──► SENT
///                           ├──► RETRYING ──(backoff)──► IN_PROGRESS ...
///                           └──► FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Enqueued, never attempted.
    Pending,
    /// Claimed by a worker; delivery attempt underway.
    InProgress,
    /// Last attempt failed; eligible again once the backoff has elapsed.
    Retrying,
    /// Delivered (terminal).
    Sent,
    /// Retry limit exhausted (terminal until manually requeued).
    Failed,
}

impl OutboxStatus {
    /// Returns the status as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::InProgress => "IN_PROGRESS",
            OutboxStatus::Retrying => "RETRYING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }

    /// Returns true if the worker never touches a row in this status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Failed)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "IN_PROGRESS" => Ok(OutboxStatus::InProgress),
            "RETRYING" => Ok(OutboxStatus::Retrying),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::UnknownStatus(other.to_string())),
        }
    }
}

/// A message waiting to be written to the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    pub event_type: Option<String>,
    pub topic: String,
    pub payload: serde_json::Value,
}

impl NewOutboxMessage {
    /// Creates a message for the given topic with no event type.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: None,
            topic: topic.into(),
            payload,
        }
    }

    /// Sets the optional event type column.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }
}

/// A persisted outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxId,
    pub event_type: Option<String>,
    pub topic: String,
    /// Opaque to the outbox; never modified after insert.
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl OutboxMessage {
    /// Timestamp of the last status change, falling back to creation time.
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Extracts the saga step correlation carried by saga commands.
    ///
    /// Returns `None` unless the payload holds both a parseable `sagaId`
    /// and `sagaStepId`.
    pub fn saga_step(&self) -> Option<(SagaId, StepId)> {
        let saga_id = self.payload.get("sagaId")?.as_str()?.parse().ok()?;
        let step_id = self.payload.get("sagaStepId")?.as_str()?.parse().ok()?;
        Some((saga_id, step_id))
    }
}
