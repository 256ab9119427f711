//! Durable, time-keyed work queue.
//!
//! Provides `WorkQueueEntry` and `WorkQueueStatus`, the catalog operations that
//! enqueue, claim and settle entries, and `QueueWorker`, which drains due
//! entries through handlers registered per queue type.

pub mod db;
pub mod entry;
pub mod worker;

pub use entry::{WorkQueueEntry, WorkQueueStatus};
pub use worker::{
    CompressStudyHandler, DrainReport, HandlerContext, PurgeStudyHandler, QueueWorker,
    TierMigrateHandler, WorkHandler,
};
