//! Catalog operations for the `work_queue` table.
//!
//! Entries are keyed by uuid and indexed on `(status, queue_type,
//! scheduled_time)`, so a due scan is a single ordered range over pending rows.
//! Every state transition is a conditional `UPDATE` whose affected-row count
//! says whether this worker won.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::catalog::{from_millis, to_millis, Catalog};
use crate::config::WorkQueueConfig;
use crate::error::{Result, StrataError};
use crate::types::QueueType;

use super::entry::{WorkQueueEntry, WorkQueueStatus};

const COLUMNS: &str = "id, queue_type, study_key, filesystem_key, scheduled_time, status, \
                       failure_reason, retry_count, data, claimed_by, created_at, updated_at";

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

pub const MAX_RETRY_DELAY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt after `retry_count` retries were consumed.
    /// Doubles per retry, capped at [`MAX_RETRY_DELAY_DAYS`].
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let cap = Duration::days(MAX_RETRY_DELAY_DAYS);
        let factor = 1i64 << retry_count.min(16);
        self.backoff
            .num_milliseconds()
            .checked_mul(factor)
            .and_then(Duration::try_milliseconds)
            .map_or(cap, |delay| delay.min(cap))
    }
}

impl From<&WorkQueueConfig> for RetryPolicy {
    fn from(cfg: &WorkQueueConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff: cfg.retry_backoff(),
        }
    }
}

/// How a failed attempt is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A real fault: consumes one retry.
    Fault,
    /// Nothing eligible right now: requeue without consuming a retry.
    Unavailable,
}

// ---------------------------------------------------------------------------
// Catalog: work queue
// ---------------------------------------------------------------------------

impl Catalog {
    pub fn insert_work_queue(&self, entry: &WorkQueueEntry) -> Result<()> {
        insert_entry(self.conn(), entry)
    }

    pub fn load_work_queue(&self, id: Uuid) -> Result<WorkQueueEntry> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM work_queue WHERE id = ?1"),
                [id.to_string()],
                EntryRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StrataError::WorkQueueEntryNotFound(id.to_string()))?
            .try_into()
    }

    pub fn delete_work_queue(&self, id: Uuid) -> Result<()> {
        let changed = self
            .conn()
            .execute("DELETE FROM work_queue WHERE id = ?1", [id.to_string()])?;
        if changed == 0 {
            return Err(StrataError::WorkQueueEntryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// All entries, optionally narrowed to one queue type, in schedule order.
    pub fn list_work_queue(&self, queue_type: Option<QueueType>) -> Result<Vec<WorkQueueEntry>> {
        match queue_type {
            Some(t) => self.query_entries(
                &format!(
                    "SELECT {COLUMNS} FROM work_queue WHERE queue_type = ?1
                     ORDER BY scheduled_time, id"
                ),
                [t.as_str()],
            ),
            None => self.query_entries(
                &format!("SELECT {COLUMNS} FROM work_queue ORDER BY scheduled_time, id"),
                [],
            ),
        }
    }

    /// Pending entries of `queue_type` scheduled at or before `now`, oldest first.
    /// Read-only: nothing is claimed.
    pub fn due_work_queue(
        &self,
        queue_type: QueueType,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkQueueEntry>> {
        self.query_entries(
            &format!(
                "SELECT {COLUMNS} FROM work_queue
                 WHERE status = 'pending' AND queue_type = ?1 AND scheduled_time <= ?2
                 ORDER BY scheduled_time, id LIMIT ?3"
            ),
            params![queue_type.as_str(), to_millis(now), limit_to_sql(limit)],
        )
    }

    /// Like [`Catalog::due_work_queue`], restricted to one filesystem.
    pub fn due_work_queue_on_filesystem(
        &self,
        queue_type: QueueType,
        filesystem_key: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkQueueEntry>> {
        self.query_entries(
            &format!(
                "SELECT {COLUMNS} FROM work_queue
                 WHERE status = 'pending' AND queue_type = ?1 AND filesystem_key = ?2
                   AND scheduled_time <= ?3
                 ORDER BY scheduled_time, id LIMIT ?4"
            ),
            params![
                queue_type.as_str(),
                filesystem_key,
                to_millis(now),
                limit_to_sql(limit)
            ],
        )
    }

    /// Claim up to `limit` due entries of `queue_type` for `worker`.
    ///
    /// Each claim is a compare-and-set on `status = 'pending'`; entries another
    /// worker took first are skipped. Returned entries are `InProgress`.
    pub fn dequeue_due(
        &self,
        queue_type: QueueType,
        worker: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkQueueEntry>> {
        let candidates = self.due_work_queue(queue_type, now, limit)?;
        let mut claimed = Vec::with_capacity(candidates.len());
        for mut entry in candidates {
            if self.claim_work_queue(entry.id, worker, now)? {
                entry.status = WorkQueueStatus::InProgress;
                entry.claimed_by = Some(worker.to_string());
                entry.updated_at = now;
                claimed.push(entry);
            }
        }
        Ok(claimed)
    }

    /// Compare-and-set `Pending → InProgress`. Returns false if another worker won.
    pub fn claim_work_queue(&self, id: Uuid, worker: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE work_queue
             SET status = 'in_progress', claimed_by = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'pending' AND scheduled_time <= ?3",
            params![id.to_string(), worker, to_millis(now)],
        )?;
        Ok(changed == 1)
    }

    /// Settle a claimed entry as completed.
    pub fn complete_work_queue(&self, id: Uuid, worker: &str, now: DateTime<Utc>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE work_queue
             SET status = 'completed', failure_reason = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'in_progress' AND claimed_by = ?2",
            params![id.to_string(), worker, to_millis(now)],
        )?;
        if changed == 0 {
            return Err(StrataError::ClaimLost(id.to_string()));
        }
        Ok(())
    }

    /// Settle a claimed entry after a failed attempt.
    ///
    /// Faults requeue with exponential backoff while retries remain and fail the
    /// entry once they are exhausted. `Unavailable` always requeues and leaves
    /// the retry count alone. Returns the resulting status.
    pub fn fail_work_queue(
        &self,
        id: Uuid,
        worker: &str,
        reason: &str,
        kind: FailureKind,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<WorkQueueStatus> {
        self.write_tx(|conn| {
            let retry_count: u32 = conn
                .query_row(
                    "SELECT retry_count FROM work_queue
                     WHERE id = ?1 AND status = 'in_progress' AND claimed_by = ?2",
                    params![id.to_string(), worker],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StrataError::ClaimLost(id.to_string()))?;

            let (status, next_count) = match kind {
                FailureKind::Unavailable => (WorkQueueStatus::Pending, retry_count),
                FailureKind::Fault if retry_count < policy.max_retries => {
                    (WorkQueueStatus::Pending, retry_count + 1)
                }
                FailureKind::Fault => (
                    WorkQueueStatus::Failed {
                        reason: reason.to_string(),
                    },
                    retry_count,
                ),
            };
            let scheduled = now + policy.delay_for(retry_count);
            conn.execute(
                "UPDATE work_queue
                 SET status = ?2, failure_reason = ?3, retry_count = ?4, claimed_by = NULL,
                     scheduled_time = CASE WHEN ?2 = 'pending' THEN ?5 ELSE scheduled_time END,
                     updated_at = ?6
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    status.as_str(),
                    reason,
                    next_count,
                    to_millis(scheduled),
                    to_millis(now)
                ],
            )?;
            Ok(status)
        })
    }

    /// Pending entries targeting `study_key`.
    pub fn pending_work_queue_for_study(&self, study_key: &str) -> Result<Vec<WorkQueueEntry>> {
        self.query_entries(
            &format!(
                "SELECT {COLUMNS} FROM work_queue
                 WHERE study_key = ?1 AND status = 'pending'
                 ORDER BY scheduled_time, id"
            ),
            [study_key],
        )
    }

    /// Remove the pending entries of `study_key` whose type is in `types`.
    /// Returns the removed entries.
    pub fn delete_pending_work_queue_for_study(
        &self,
        study_key: &str,
        types: &[QueueType],
    ) -> Result<Vec<WorkQueueEntry>> {
        let doomed: Vec<WorkQueueEntry> = self
            .pending_work_queue_for_study(study_key)?
            .into_iter()
            .filter(|e| types.contains(&e.queue_type))
            .collect();
        self.write_tx(|conn| {
            let mut removed = Vec::with_capacity(doomed.len());
            for entry in doomed {
                let changed = conn.execute(
                    "DELETE FROM work_queue WHERE id = ?1 AND status = 'pending'",
                    [entry.id.to_string()],
                )?;
                if changed == 1 {
                    removed.push(entry);
                }
            }
            Ok(removed)
        })
    }

    /// Return in-progress entries untouched since before `cutoff` to the queue.
    ///
    /// An abandoned attempt consumes a retry; entries with no retries left are
    /// failed instead. Returns the number of entries recovered.
    pub fn recover_stuck_work_queue(
        &self,
        cutoff: DateTime<Utc>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        self.write_tx(|conn| {
            let requeued = conn.execute(
                "UPDATE work_queue
                 SET status = 'pending', claimed_by = NULL, retry_count = retry_count + 1,
                     scheduled_time = ?3, updated_at = ?3
                 WHERE status = 'in_progress' AND updated_at < ?1 AND retry_count < ?2",
                params![to_millis(cutoff), policy.max_retries, to_millis(now)],
            )?;
            let failed = conn.execute(
                "UPDATE work_queue
                 SET status = 'failed', failure_reason = 'abandoned by worker',
                     claimed_by = NULL, updated_at = ?2
                 WHERE status = 'in_progress' AND updated_at < ?1",
                params![to_millis(cutoff), to_millis(now)],
            )?;
            Ok(u32::try_from(requeued + failed).unwrap_or(u32::MAX))
        })
    }

    /// Delete completed entries last updated before `cutoff`.
    pub fn purge_completed_work_queue(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM work_queue WHERE status = 'completed' AND updated_at < ?1",
            [to_millis(cutoff)],
        )?)
    }

    fn query_entries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<WorkQueueEntry>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt
            .query_map(params, EntryRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(WorkQueueEntry::try_from).collect()
    }
}

pub(crate) fn insert_entry(conn: &Connection, entry: &WorkQueueEntry) -> Result<()> {
    let data = entry
        .data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        &format!("INSERT INTO work_queue ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
        params![
            entry.id.to_string(),
            entry.queue_type.as_str(),
            entry.study_key,
            entry.filesystem_key,
            to_millis(entry.scheduled_time),
            entry.status.as_str(),
            entry.status.reason(),
            entry.retry_count,
            data,
            entry.claimed_by,
            to_millis(entry.created_at),
            to_millis(entry.updated_at),
        ],
    )?;
    Ok(())
}

fn limit_to_sql(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct EntryRow {
    id: String,
    queue_type: String,
    study_key: Option<String>,
    filesystem_key: Option<String>,
    scheduled_time: i64,
    status: String,
    failure_reason: Option<String>,
    retry_count: u32,
    data: Option<String>,
    claimed_by: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            queue_type: row.get(1)?,
            study_key: row.get(2)?,
            filesystem_key: row.get(3)?,
            scheduled_time: row.get(4)?,
            status: row.get(5)?,
            failure_reason: row.get(6)?,
            retry_count: row.get(7)?,
            data: row.get(8)?,
            claimed_by: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl TryFrom<EntryRow> for WorkQueueEntry {
    type Error = StrataError;

    fn try_from(row: EntryRow) -> Result<Self> {
        let status = WorkQueueStatus::from_parts(&row.status, row.failure_reason).ok_or(
            StrataError::UnknownType {
                kind: "work queue status",
                value: row.status,
            },
        )?;
        Ok(WorkQueueEntry {
            id: Uuid::parse_str(&row.id)?,
            queue_type: row.queue_type.parse()?,
            study_key: row.study_key,
            filesystem_key: row.filesystem_key,
            scheduled_time: from_millis(row.scheduled_time),
            status,
            retry_count: row.retry_count,
            data: row.data.as_deref().map(serde_json::from_str).transpose()?,
            claimed_by: row.claimed_by,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
