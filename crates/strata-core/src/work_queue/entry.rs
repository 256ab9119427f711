//! Work queue data model.
//!
//! A `WorkQueueEntry` is invisible to workers until its `scheduled_time` has
//! passed. Workers move it `Pending → InProgress` with a compare-and-set claim
//! and settle it as `Completed`, back to `Pending` (retry), or `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::QueueType;

// ---------------------------------------------------------------------------
// WorkQueueStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an entry.
///
/// Transitions: `Pending → InProgress → Completed | Pending (retry) | Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkQueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed { reason: String },
}

impl WorkQueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkQueueStatus::Pending => "pending",
            WorkQueueStatus::InProgress => "in_progress",
            WorkQueueStatus::Completed => "completed",
            WorkQueueStatus::Failed { .. } => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            WorkQueueStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// Rebuild from the stored status text and failure reason.
    pub(crate) fn from_parts(status: &str, reason: Option<String>) -> Option<Self> {
        match status {
            "pending" => Some(WorkQueueStatus::Pending),
            "in_progress" => Some(WorkQueueStatus::InProgress),
            "completed" => Some(WorkQueueStatus::Completed),
            "failed" => Some(WorkQueueStatus::Failed {
                reason: reason.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for WorkQueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkQueueEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkQueueEntry {
    pub id: Uuid,
    pub queue_type: QueueType,
    pub study_key: Option<String>,
    pub filesystem_key: Option<String>,
    pub scheduled_time: DateTime<Utc>,
    pub status: WorkQueueStatus,
    pub retry_count: u32,
    /// Handler-specific payload (e.g. a compression ratio).
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkQueueEntry {
    /// A new `Pending` entry that becomes visible at `scheduled_time`.
    pub fn new(queue_type: QueueType, scheduled_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            queue_type,
            study_key: None,
            filesystem_key: None,
            scheduled_time,
            status: WorkQueueStatus::Pending,
            retry_count: 0,
            data: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_study(mut self, study_key: impl Into<String>) -> Self {
        self.study_key = Some(study_key.into());
        self
    }

    pub fn on_filesystem(mut self, filesystem_key: impl Into<String>) -> Self {
        self.filesystem_key = Some(filesystem_key.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkQueueStatus::Pending && self.scheduled_time <= now
    }
}
