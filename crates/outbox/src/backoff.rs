//! Retry limit and exponential backoff for failed deliveries.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::message::OutboxStatus;

/// Largest power of two the backoff base is multiplied by. Past this the
/// delay stops growing instead of overflowing.
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// How many delivery attempts a row gets and how long it waits between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of failed attempts after which a row becomes FAILED.
    pub retry_limit: u32,
    /// Delay before the first retry; doubles with every further failure.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retry_limit: u32, base_backoff: Duration) -> Self {
        Self {
            retry_limit,
            base_backoff,
        }
    }

    /// Minimum time a row with `retry_count` failures must rest since its
    /// last update: `base_backoff * 2^min(retry_count - 1, 30)`, zero for a
    /// row that never failed.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (retry_count - 1).min(MAX_BACKOFF_EXPONENT);
        self.base_backoff.saturating_mul(factor)
    }

    /// Returns true once the backoff for `retry_count` has elapsed.
    pub fn is_due(&self, retry_count: u32, last_update: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let elapsed = (now - last_update).to_std().unwrap_or(Duration::ZERO);
        elapsed >= self.backoff_for(retry_count)
    }

    /// Status a row takes after a failed attempt brings it to `retry_count`.
    pub fn status_after_failure(&self, retry_count: u32) -> OutboxStatus {
        if retry_count < self.retry_limit {
            OutboxStatus::Retrying
        } else {
            OutboxStatus::Failed
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            base_backoff: Duration::from_millis(2000),
        }
    }
}
