//! Recurring jobs guarded by persistent, fleet-wide service locks.
//!
//! Every worker runs the same [`Scheduler`]. Each tick it claims due locks with
//! a compare-and-set update, runs the job a registered [`JobFactory`] builds
//! for the lock's type, and releases the lock with the job's next run time.
//! At most one worker holds a lock at a time; losing a claim race is a no-op.

pub mod jobs;
pub mod lock;
pub mod scheduler;

pub use jobs::{FilesystemDeleteFactory, QueueMaintenanceFactory, ReapplyRulesFactory};
pub use lock::{lock_key, LockOutcome, LockState, ServiceLock};
pub use scheduler::{JobContext, JobFactory, JobRegistry, Scheduler, ServiceLockJob, TickReport};
