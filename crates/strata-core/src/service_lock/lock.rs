//! Persistent service-lock records and their compare-and-set claim.
//!
//! A lock names one recurring job, optionally scoped to one filesystem. Any
//! worker may claim a lock once its scheduled time has passed and no live claim
//! exists; the claim is a single conditional `UPDATE`, so exactly one of several
//! racing workers sees an affected row. Claims expire, which bounds how long a
//! crashed owner can hold a lock.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::{from_millis, to_millis, Catalog};
use crate::error::{Result, StrataError};
use crate::types::ServiceLockType;

// ---------------------------------------------------------------------------
// LockState / LockOutcome
// ---------------------------------------------------------------------------

/// Transitions: `Idle → Claimed → Running → Idle | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Idle,
    Claimed,
    Running,
    /// The last run failed. Claimable again once rescheduled time passes.
    Failed,
}

impl LockState {
    pub fn as_str(self) -> &'static str {
        match self {
            LockState::Idle => "idle",
            LockState::Claimed => "claimed",
            LockState::Running => "running",
            LockState::Failed => "failed",
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LockState {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        [
            LockState::Idle,
            LockState::Claimed,
            LockState::Running,
            LockState::Failed,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
        .ok_or_else(|| StrataError::UnknownType {
            kind: "lock state",
            value: s.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Succeeded,
    Failed(String),
}

impl LockOutcome {
    fn state(&self) -> LockState {
        match self {
            LockOutcome::Succeeded => LockState::Idle,
            LockOutcome::Failed(_) => LockState::Failed,
        }
    }

    fn describe(&self) -> String {
        match self {
            LockOutcome::Succeeded => "ok".to_string(),
            LockOutcome::Failed(reason) => reason.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceLock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLock {
    pub key: String,
    pub lock_type: ServiceLockType,
    pub filesystem_key: Option<String>,
    pub enabled: bool,
    pub state: LockState,
    /// Earliest time the job may next run.
    pub scheduled_time: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
    pub owner: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
}

impl ServiceLock {
    pub fn new(
        lock_type: ServiceLockType,
        filesystem_key: Option<String>,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self {
            key: lock_key(lock_type, filesystem_key.as_deref()),
            lock_type,
            filesystem_key,
            enabled: true,
            state: LockState::Idle,
            scheduled_time,
            last_run: None,
            last_outcome: None,
            owner: None,
            claim_expires_at: None,
        }
    }

    /// Whether a claim attempt at `now` could succeed.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        let claim_live = match (&self.owner, self.claim_expires_at) {
            (Some(_), Some(expires)) => expires > now,
            (Some(_), None) => true,
            (None, _) => false,
        };
        self.enabled && self.scheduled_time <= now && !claim_live
    }
}

/// `filesystem-delete:fs1` for scoped locks, `queue-maintenance` for global ones.
pub fn lock_key(lock_type: ServiceLockType, filesystem_key: Option<&str>) -> String {
    match filesystem_key {
        Some(fs) => format!("{lock_type}:{fs}"),
        None => lock_type.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Catalog: service locks
// ---------------------------------------------------------------------------

const COLUMNS: &str = "key, lock_type, filesystem_key, enabled, state, scheduled_time, \
                       last_run, last_outcome, owner, claim_expires_at";

impl Catalog {
    /// Insert `lock` unless a lock with the same key exists. Returns true if inserted.
    pub fn seed_service_lock(&self, lock: &ServiceLock) -> Result<bool> {
        let inserted = self.conn().execute(
            &format!(
                "INSERT OR IGNORE INTO service_lock ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                lock.key,
                lock.lock_type.as_str(),
                lock.filesystem_key,
                lock.enabled,
                lock.state.as_str(),
                to_millis(lock.scheduled_time),
                lock.last_run.map(to_millis),
                lock.last_outcome,
                lock.owner,
                lock.claim_expires_at.map(to_millis),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn load_service_lock(&self, key: &str) -> Result<ServiceLock> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM service_lock WHERE key = ?1"),
                [key],
                LockRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StrataError::ServiceLockNotFound(key.to_string()))?;
        ServiceLock::try_from(row)
    }

    /// All locks ordered by key.
    pub fn list_service_locks(&self) -> Result<Vec<ServiceLock>> {
        self.query_locks(
            &format!("SELECT {COLUMNS} FROM service_lock ORDER BY key"),
            [],
        )
    }

    /// Enabled locks whose scheduled time has passed and whose claim is absent or expired.
    pub fn due_service_locks(&self, now: DateTime<Utc>) -> Result<Vec<ServiceLock>> {
        self.query_locks(
            &format!(
                "SELECT {COLUMNS} FROM service_lock
                 WHERE enabled = 1 AND scheduled_time <= ?1
                   AND (owner IS NULL OR claim_expires_at <= ?1)
                 ORDER BY scheduled_time, key"
            ),
            [to_millis(now)],
        )
    }

    /// Compare-and-set claim. Returns false when the lock is not due, disabled, or
    /// held by a live claim; losing is not an error.
    pub fn claim_service_lock(
        &self,
        key: &str,
        worker: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE service_lock
             SET owner = ?2, claim_expires_at = ?4, state = 'claimed'
             WHERE key = ?1 AND enabled = 1 AND scheduled_time <= ?3
               AND (owner IS NULL OR claim_expires_at IS NULL OR claim_expires_at <= ?3)",
            params![key, worker, to_millis(now), to_millis(now + ttl)],
        )?;
        Ok(changed == 1)
    }

    pub fn mark_service_lock_running(&self, key: &str, worker: &str) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE service_lock SET state = 'running' WHERE key = ?1 AND owner = ?2",
            params![key, worker],
        )?;
        if changed == 0 {
            return Err(StrataError::ClaimLost(key.to_string()));
        }
        Ok(())
    }

    /// Push the claim held by `worker` out to `now + ttl`. Fails with
    /// [`StrataError::ClaimLost`] once another worker has taken the lock over or
    /// it has been released.
    pub fn renew_service_lock(
        &self,
        key: &str,
        worker: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE service_lock SET claim_expires_at = ?3 WHERE key = ?1 AND owner = ?2",
            params![key, worker, to_millis(now + ttl)],
        )?;
        if changed == 0 {
            return Err(StrataError::ClaimLost(key.to_string()));
        }
        Ok(())
    }

    /// Release a claim held by `worker`, recording the outcome and the next run time.
    pub fn release_service_lock(
        &self,
        key: &str,
        worker: &str,
        next_run: DateTime<Utc>,
        outcome: &LockOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE service_lock
             SET owner = NULL, claim_expires_at = NULL, state = ?3,
                 scheduled_time = ?4, last_run = ?5, last_outcome = ?6
             WHERE key = ?1 AND owner = ?2",
            params![
                key,
                worker,
                outcome.state().as_str(),
                to_millis(next_run),
                to_millis(now),
                outcome.describe(),
            ],
        )?;
        if changed == 0 {
            return Err(StrataError::ClaimLost(key.to_string()));
        }
        Ok(())
    }

    pub fn set_service_lock_enabled(&self, key: &str, enabled: bool) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE service_lock SET enabled = ?2 WHERE key = ?1",
            params![key, enabled],
        )?;
        if changed == 0 {
            return Err(StrataError::ServiceLockNotFound(key.to_string()));
        }
        Ok(())
    }

    /// Move the next eligible run time, e.g. to force an immediate run.
    pub fn schedule_service_lock(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE service_lock SET scheduled_time = ?2 WHERE key = ?1",
            params![key, to_millis(at)],
        )?;
        if changed == 0 {
            return Err(StrataError::ServiceLockNotFound(key.to_string()));
        }
        Ok(())
    }

    fn query_locks(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ServiceLock>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt
            .query_map(params, LockRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ServiceLock::try_from).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct LockRow {
    key: String,
    lock_type: String,
    filesystem_key: Option<String>,
    enabled: bool,
    state: String,
    scheduled_time: i64,
    last_run: Option<i64>,
    last_outcome: Option<String>,
    owner: Option<String>,
    claim_expires_at: Option<i64>,
}

impl LockRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            lock_type: row.get(1)?,
            filesystem_key: row.get(2)?,
            enabled: row.get(3)?,
            state: row.get(4)?,
            scheduled_time: row.get(5)?,
            last_run: row.get(6)?,
            last_outcome: row.get(7)?,
            owner: row.get(8)?,
            claim_expires_at: row.get(9)?,
        })
    }
}

impl TryFrom<LockRow> for ServiceLock {
    type Error = StrataError;

    fn try_from(row: LockRow) -> Result<Self> {
        Ok(ServiceLock {
            key: row.key,
            lock_type: row.lock_type.parse()?,
            filesystem_key: row.filesystem_key,
            enabled: row.enabled,
            state: row.state.parse()?,
            scheduled_time: from_millis(row.scheduled_time),
            last_run: row.last_run.map(from_millis),
            last_outcome: row.last_outcome,
            owner: row.owner,
            claim_expires_at: row.claim_expires_at.map(from_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn seeded(catalog: &Catalog) -> ServiceLock {
        let lock = ServiceLock::new(ServiceLockType::FilesystemDelete, Some("fs1".into()), t0());
        assert!(catalog.seed_service_lock(&lock).unwrap());
        lock
    }

    #[test]
    fn keys_include_filesystem_scope() {
        assert_eq!(
            lock_key(ServiceLockType::FilesystemDelete, Some("fs1")),
            "filesystem-delete:fs1"
        );
        assert_eq!(lock_key(ServiceLockType::QueueMaintenance, None), "queue-maintenance");
    }

    #[test]
    fn seeding_is_idempotent() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lock = seeded(&catalog);
        let mut again = lock.clone();
        again.scheduled_time = t0() + Duration::days(1);
        assert!(!catalog.seed_service_lock(&again).unwrap());
        assert_eq!(catalog.load_service_lock(&lock.key).unwrap(), lock);
        assert_eq!(catalog.list_service_locks().unwrap().len(), 1);
    }

    #[test]
    fn claim_requires_due_time() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lock = seeded(&catalog);
        let early = t0() - Duration::seconds(1);
        assert!(!catalog
            .claim_service_lock(&lock.key, "w1", early, Duration::minutes(10))
            .unwrap());
        assert!(catalog
            .claim_service_lock(&lock.key, "w1", t0(), Duration::minutes(10))
            .unwrap());
        let loaded = catalog.load_service_lock(&lock.key).unwrap();
        assert_eq!(loaded.state, LockState::Claimed);
        assert_eq!(loaded.owner.as_deref(), Some("w1"));
    }

    #[test]
    fn live_claim_blocks_until_expiry() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lock = seeded(&catalog);
        let ttl = Duration::minutes(10);
        assert!(catalog.claim_service_lock(&lock.key, "w1", t0(), ttl).unwrap());
        assert!(!catalog
            .claim_service_lock(&lock.key, "w2", t0() + Duration::minutes(5), ttl)
            .unwrap());
        assert!(catalog.due_service_locks(t0() + Duration::minutes(5)).unwrap().is_empty());

        let expired = t0() + Duration::minutes(10);
        assert_eq!(catalog.due_service_locks(expired).unwrap().len(), 1);
        assert!(catalog.claim_service_lock(&lock.key, "w2", expired, ttl).unwrap());
        assert_eq!(
            catalog.load_service_lock(&lock.key).unwrap().owner.as_deref(),
            Some("w2")
        );
    }

    #[test]
    fn disabled_lock_is_never_claimed() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lock = seeded(&catalog);
        catalog.set_service_lock_enabled(&lock.key, false).unwrap();
        assert!(!catalog
            .claim_service_lock(&lock.key, "w1", t0(), Duration::minutes(10))
            .unwrap());
        assert!(catalog.due_service_locks(t0()).unwrap().is_empty());
    }

    #[test]
    fn release_records_outcome_and_next_run() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lock = seeded(&catalog);
        catalog
            .claim_service_lock(&lock.key, "w1", t0(), Duration::minutes(10))
            .unwrap();
        catalog.mark_service_lock_running(&lock.key, "w1").unwrap();
        assert_eq!(
            catalog.load_service_lock(&lock.key).unwrap().state,
            LockState::Running
        );

        let next = t0() + Duration::hours(1);
        catalog
            .release_service_lock(
                &lock.key,
                "w1",
                next,
                &LockOutcome::Failed("disk on fire".into()),
                t0(),
            )
            .unwrap();
        let loaded = catalog.load_service_lock(&lock.key).unwrap();
        assert_eq!(loaded.state, LockState::Failed);
        assert_eq!(loaded.owner, None);
        assert_eq!(loaded.scheduled_time, next);
        assert_eq!(loaded.last_run, Some(t0()));
        assert_eq!(loaded.last_outcome.as_deref(), Some("disk on fire"));
    }

    #[test]
    fn renewal_extends_only_the_owners_claim() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lock = seeded(&catalog);
        let ttl = Duration::minutes(10);
        assert!(catalog.claim_service_lock(&lock.key, "w1", t0(), ttl).unwrap());

        catalog
            .renew_service_lock(&lock.key, "w1", t0() + Duration::minutes(8), ttl)
            .unwrap();
        // The original expiry has passed, but the renewed claim still holds.
        let later = t0() + Duration::minutes(12);
        assert!(!catalog.claim_service_lock(&lock.key, "w2", later, ttl).unwrap());
        assert_eq!(
            catalog.load_service_lock(&lock.key).unwrap().claim_expires_at,
            Some(t0() + Duration::minutes(18))
        );

        assert!(matches!(
            catalog.renew_service_lock(&lock.key, "w2", later, ttl),
            Err(StrataError::ClaimLost(_))
        ));
    }

    #[test]
    fn renewal_after_takeover_is_claim_lost() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lock = seeded(&catalog);
        let ttl = Duration::minutes(10);
        assert!(catalog.claim_service_lock(&lock.key, "w1", t0(), ttl).unwrap());
        let expired = t0() + Duration::minutes(30);
        assert!(catalog.claim_service_lock(&lock.key, "w2", expired, ttl).unwrap());

        assert!(matches!(
            catalog.renew_service_lock(&lock.key, "w1", expired, ttl),
            Err(StrataError::ClaimLost(_))
        ));
        assert_eq!(
            catalog.load_service_lock(&lock.key).unwrap().owner.as_deref(),
            Some("w2")
        );
    }

    #[test]
    fn release_by_non_owner_is_claim_lost() {
        let catalog = Catalog::open_in_memory().unwrap();
        let lock = seeded(&catalog);
        catalog
            .claim_service_lock(&lock.key, "w1", t0(), Duration::minutes(10))
            .unwrap();
        let err = catalog
            .release_service_lock(&lock.key, "w2", t0(), &LockOutcome::Succeeded, t0())
            .unwrap_err();
        assert!(matches!(err, StrataError::ClaimLost(_)));
        assert!(matches!(
            catalog.mark_service_lock_running(&lock.key, "w2"),
            Err(StrataError::ClaimLost(_))
        ));
    }

    #[test]
    fn unknown_lock_is_not_found() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(matches!(
            catalog.load_service_lock("nope"),
            Err(StrataError::ServiceLockNotFound(_))
        ));
        assert!(matches!(
            catalog.schedule_service_lock("nope", t0()),
            Err(StrataError::ServiceLockNotFound(_))
        ));
    }

    #[test]
    fn exactly_one_of_many_concurrent_claimants_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strata.db");
        let key = seeded(&Catalog::open(&path).unwrap()).key;

        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let path = path.clone();
                let key = key.clone();
                thread::spawn(move || {
                    let catalog = Catalog::open(&path).unwrap();
                    barrier.wait();
                    catalog
                        .claim_service_lock(&key, &format!("w{i}"), t0(), Duration::minutes(10))
                        .unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
