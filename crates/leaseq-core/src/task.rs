use crate::{QueueError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Generated ids are 128-bit random uuids rendered as 32 lowercase hex
/// characters. Ids coming off the wire are kept verbatim, so lookups with a
/// token the broker never issued simply miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        TaskId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        TaskId(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        TaskId(value)
    }
}

/// Lease state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeaseState {
    /// Eligible for dequeue
    Idle,
    /// Handed out by GET; reverts to idle once `expires_at` has passed
    Leased { expires_at: DateTime<Utc> },
}

impl LeaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Idle => "idle",
            LeaseState::Leased { .. } => "leased",
        }
    }
}

/// A single unit of work held by a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier, immutable for the life of the task
    pub id: TaskId,

    /// Producer-supplied hint, never interpreted by the broker
    pub length: i64,

    /// Opaque payload
    pub data: String,

    /// Current lease
    pub lease: LeaseState,
}

impl Task {
    /// Create a new idle task with a fresh id
    pub fn new(length: i64, data: impl Into<String>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(QueueError::EmptyPayload);
        }

        Ok(Task {
            id: TaskId::generate(),
            length,
            data,
            lease: LeaseState::Idle,
        })
    }

    /// Parse the length hint the way it arrives on the wire
    pub fn parse_length(raw: &str) -> Result<i64> {
        raw.parse::<i64>()
            .map_err(|_| QueueError::InvalidLength(raw.to_string()))
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.lease, LeaseState::Idle)
    }

    pub fn is_leased(&self) -> bool {
        !self.is_idle()
    }

    pub fn lease_expires_at(&self) -> Option<DateTime<Utc>> {
        match self.lease {
            LeaseState::Idle => None,
            LeaseState::Leased { expires_at } => Some(expires_at),
        }
    }

    /// Mark task as handed out until `now + timeout`. A deadline past the end
    /// of the calendar saturates; a negative timeout counts as zero.
    pub fn lease(&mut self, now: DateTime<Utc>, timeout: Duration) {
        let expires_at = now
            .checked_add_signed(timeout.max(Duration::zero()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.lease = LeaseState::Leased { expires_at };
    }

    /// Release task back to idle
    pub fn release(&mut self) {
        self.lease = LeaseState::Idle;
    }

    /// A lease is expired only once `now` is strictly past its expiry
    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        match self.lease {
            LeaseState::Idle => false,
            LeaseState::Leased { expires_at } => now > expires_at,
        }
    }
}
