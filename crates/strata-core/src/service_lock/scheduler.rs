//! Claims due service locks and runs the job each one names.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::command::CancelToken;
use crate::config::SchedulerConfig;
use crate::error::{Result, StrataError};
use crate::types::ServiceLockType;

use super::lock::{LockOutcome, ServiceLock};

// ---------------------------------------------------------------------------
// Jobs and factories
// ---------------------------------------------------------------------------

/// Everything one job run gets to see. Built fresh for each run.
pub struct JobContext<'a> {
    pub catalog: &'a Catalog,
    pub lock: &'a ServiceLock,
    pub now: DateTime<Utc>,
    pub cancel: &'a CancelToken,
    pub worker_id: &'a str,
    claim_ttl: Duration,
    started: Instant,
}

impl<'a> JobContext<'a> {
    pub fn new(
        catalog: &'a Catalog,
        lock: &'a ServiceLock,
        now: DateTime<Utc>,
        cancel: &'a CancelToken,
        worker_id: &'a str,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            lock,
            now,
            cancel,
            worker_id,
            claim_ttl,
            started: Instant::now(),
        }
    }

    /// Called between units of work. Stops the run on cancellation, otherwise
    /// renews this worker's claim so a long run is not taken over mid-way.
    /// Returns [`StrataError::ClaimLost`] when another worker already holds the lock.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(StrataError::Cancelled);
        }
        let elapsed = Duration::from_std(self.started.elapsed()).unwrap_or(Duration::zero());
        self.catalog.renew_service_lock(
            &self.lock.key,
            self.worker_id,
            self.now + elapsed,
            self.claim_ttl,
        )
    }

    /// The filesystem this run is scoped to, for per-filesystem job types.
    pub fn filesystem_key(&self) -> Result<&str> {
        self.lock
            .filesystem_key
            .as_deref()
            .ok_or_else(|| StrataError::LockScope(self.lock.key.clone()))
    }
}

pub trait ServiceLockJob: Send {
    /// Run once and return the next time the lock becomes eligible.
    fn run(&mut self, ctx: &JobContext<'_>) -> Result<DateTime<Utc>>;
}

/// Produces a fresh job per run. Factories own the collaborators their jobs need.
pub trait JobFactory: Send + Sync {
    fn lock_type(&self) -> ServiceLockType;
    fn create(&self) -> Box<dyn ServiceLockJob>;
}

#[derive(Default, Clone)]
pub struct JobRegistry {
    factories: HashMap<ServiceLockType, Arc<dyn JobFactory>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: impl JobFactory + 'static) {
        self.factories.insert(factory.lock_type(), Arc::new(factory));
    }

    pub fn get(&self, lock_type: ServiceLockType) -> Option<&Arc<dyn JobFactory>> {
        self.factories.get(&lock_type)
    }

    /// Registered types in declaration order.
    pub fn lock_types(&self) -> Vec<ServiceLockType> {
        ServiceLockType::all()
            .iter()
            .copied()
            .filter(|t| self.factories.contains_key(t))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Locks another worker claimed first, or whose claim expired mid-run.
    pub lost: usize,
}

pub struct Scheduler<'a> {
    catalog: &'a Catalog,
    registry: &'a JobRegistry,
    worker_id: String,
    claim_ttl: Duration,
    failure_retry: Duration,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        catalog: &'a Catalog,
        registry: &'a JobRegistry,
        worker_id: impl Into<String>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            catalog,
            registry,
            worker_id: worker_id.into(),
            claim_ttl: config.claim_ttl(),
            failure_retry: config.failure_retry(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Create any missing lock records: one per filesystem for scoped job types,
    /// one per global job type. Returns the number created.
    pub fn seed_locks(&self, now: DateTime<Utc>) -> Result<usize> {
        let filesystems = self.catalog.list_filesystems()?;
        let mut created = 0;
        for lock_type in self.registry.lock_types() {
            let locks: Vec<ServiceLock> = if lock_type.is_per_filesystem() {
                filesystems
                    .iter()
                    .map(|fs| ServiceLock::new(lock_type, Some(fs.key.clone()), now))
                    .collect()
            } else {
                vec![ServiceLock::new(lock_type, None, now)]
            };
            for lock in locks {
                if self.catalog.seed_service_lock(&lock)? {
                    debug!(lock = %lock.key, "service lock seeded");
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    pub fn tick(&self, cancel: &CancelToken) -> Result<TickReport> {
        self.tick_at(Utc::now(), cancel)
    }

    /// Claim and run every due lock once.
    pub fn tick_at(&self, now: DateTime<Utc>, cancel: &CancelToken) -> Result<TickReport> {
        let mut report = TickReport::default();
        for lock in self.catalog.due_service_locks(now)? {
            if cancel.is_cancelled() {
                break;
            }
            let Some(factory) = self.registry.get(lock.lock_type) else {
                debug!(lock = %lock.key, "no job factory registered, skipping");
                continue;
            };
            if !self
                .catalog
                .claim_service_lock(&lock.key, &self.worker_id, now, self.claim_ttl)?
            {
                debug!(lock = %lock.key, "lock claimed by another worker");
                report.lost += 1;
                continue;
            }
            report.claimed += 1;
            self.run_claimed(&lock, factory.as_ref(), now, cancel, &mut report)?;
        }
        Ok(report)
    }

    fn run_claimed(
        &self,
        lock: &ServiceLock,
        factory: &dyn JobFactory,
        now: DateTime<Utc>,
        cancel: &CancelToken,
        report: &mut TickReport,
    ) -> Result<()> {
        let started = self
            .catalog
            .mark_service_lock_running(&lock.key, &self.worker_id)
            .and_then(|()| self.catalog.load_service_lock(&lock.key));
        let lock = match started {
            Ok(lock) => lock,
            Err(StrataError::ClaimLost(_)) => {
                warn!(lock = %lock.key, "claim lost before the job started");
                report.lost += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let ctx = JobContext::new(
            self.catalog,
            &lock,
            now,
            cancel,
            &self.worker_id,
            self.claim_ttl,
        );
        let mut job = factory.create();
        let (next_run, outcome, failed) = match job.run(&ctx) {
            Ok(next_run) => {
                info!(lock = %lock.key, next_run = %next_run, "job completed");
                (next_run, LockOutcome::Succeeded, false)
            }
            Err(StrataError::Cancelled) => {
                info!(lock = %lock.key, "job cancelled");
                (now, LockOutcome::Failed(StrataError::Cancelled.to_string()), false)
            }
            Err(StrataError::ClaimLost(_)) => {
                // The new owner releases the lock; nothing of ours to record.
                warn!(lock = %lock.key, "claim taken over mid-run, job abandoned");
                report.lost += 1;
                return Ok(());
            }
            Err(e) => {
                error!(lock = %lock.key, error = %e, "job failed");
                (now + self.failure_retry, LockOutcome::Failed(e.to_string()), true)
            }
        };

        match self
            .catalog
            .release_service_lock(&lock.key, &self.worker_id, next_run, &outcome, now)
        {
            Ok(()) => {
                match outcome {
                    LockOutcome::Succeeded => report.completed += 1,
                    LockOutcome::Failed(_) if failed => report.failed += 1,
                    LockOutcome::Failed(_) => {}
                }
                Ok(())
            }
            Err(StrataError::ClaimLost(_)) => {
                warn!(lock = %lock.key, "claim expired before release");
                report.lost += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
