//! Draining due work entries through per-type handlers.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::attribute::AttributeValue;
use crate::catalog::Catalog;
use crate::command::{
    CancelToken, CommandProcessor, DeleteStudyStorageCommand, UpdateStudyFilesystemCommand,
    UpdateStudyStorageCommand,
};
use crate::config::WorkQueueConfig;
use crate::error::{Result, StrataError};
use crate::filesystem::{FilesystemMonitor, FilesystemSelector};
use crate::study::StudyStorage;
use crate::subject::AttributeSource;
use crate::types::QueueType;

use super::db::{FailureKind, RetryPolicy};
use super::entry::{WorkQueueEntry, WorkQueueStatus};

// ---------------------------------------------------------------------------
// WorkHandler
// ---------------------------------------------------------------------------

pub struct HandlerContext<'a> {
    pub catalog: &'a Catalog,
    pub entry: &'a WorkQueueEntry,
    pub now: DateTime<Utc>,
    pub cancel: &'a CancelToken,
}

/// Processes claimed entries of one queue type.
///
/// Returning [`StrataError::ResourceUnavailable`] (directly or wrapped in a
/// command failure) requeues the entry without consuming a retry.
pub trait WorkHandler: Send + Sync {
    fn queue_type(&self) -> QueueType;
    fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// QueueWorker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub lost: usize,
}

pub struct QueueWorker {
    worker_id: String,
    handlers: BTreeMap<QueueType, Arc<dyn WorkHandler>>,
    policy: RetryPolicy,
    batch_size: usize,
}

impl QueueWorker {
    pub fn new(worker_id: impl Into<String>, config: &WorkQueueConfig) -> Self {
        Self {
            worker_id: worker_id.into(),
            handlers: BTreeMap::new(),
            policy: RetryPolicy::from(config),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn register(&mut self, handler: impl WorkHandler + 'static) {
        self.handlers.insert(handler.queue_type(), Arc::new(handler));
    }

    pub fn queue_types(&self) -> Vec<QueueType> {
        self.handlers.keys().copied().collect()
    }

    /// Claim and process up to one batch of due entries per registered type.
    pub fn drain(
        &self,
        catalog: &Catalog,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        for (queue_type, handler) in &self.handlers {
            for _ in 0..self.batch_size {
                if cancel.is_cancelled() {
                    return Ok(report);
                }
                let Some(entry) = catalog
                    .dequeue_due(*queue_type, &self.worker_id, now, 1)?
                    .pop()
                else {
                    break;
                };
                self.process(catalog, handler.as_ref(), &entry, now, cancel, &mut report)?;
            }
        }
        if report != DrainReport::default() {
            info!(
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                "work queue drained"
            );
        }
        Ok(report)
    }

    fn process(
        &self,
        catalog: &Catalog,
        handler: &dyn WorkHandler,
        entry: &WorkQueueEntry,
        now: DateTime<Utc>,
        cancel: &CancelToken,
        report: &mut DrainReport,
    ) -> Result<()> {
        let ctx = HandlerContext {
            catalog,
            entry,
            now,
            cancel,
        };
        let settled = match handler.handle(&ctx) {
            Ok(()) => catalog
                .complete_work_queue(entry.id, &self.worker_id, now)
                .map(|()| WorkQueueStatus::Completed),
            Err(e) => {
                let kind = if e.is_retryable() {
                    FailureKind::Unavailable
                } else {
                    FailureKind::Fault
                };
                warn!(
                    entry = %entry.id,
                    queue = %entry.queue_type,
                    study = entry.study_key.as_deref().unwrap_or("-"),
                    error = %e,
                    "work entry failed"
                );
                catalog.fail_work_queue(
                    entry.id,
                    &self.worker_id,
                    &e.to_string(),
                    kind,
                    &self.policy,
                    now,
                )
            }
        };

        match settled {
            Ok(WorkQueueStatus::Completed) => report.completed += 1,
            Ok(WorkQueueStatus::Failed { .. }) => report.failed += 1,
            Ok(_) => report.retried += 1,
            Err(StrataError::ClaimLost(id)) => {
                debug!(entry = %id, "work entry claim lost before settling");
                report.lost += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

fn study_key(entry: &WorkQueueEntry) -> Result<&str> {
    entry
        .study_key
        .as_deref()
        .ok_or_else(|| StrataError::StudyNotFound(format!("entry {} has no study", entry.id)))
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// Moves a study's location record to a filesystem on a later tier.
pub struct TierMigrateHandler {
    monitor: Arc<FilesystemMonitor>,
}

impl TierMigrateHandler {
    pub fn new(monitor: Arc<FilesystemMonitor>) -> Self {
        Self { monitor }
    }
}

impl WorkHandler for TierMigrateHandler {
    fn queue_type(&self) -> QueueType {
        QueueType::TierMigrate
    }

    fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let study = ctx.catalog.load_study(study_key(ctx.entry)?)?;
        // Flags may have changed since the last poll.
        self.monitor.refresh(ctx.catalog)?;
        let current_tier = match self.monitor.get(&study.filesystem_key) {
            Some(info) => info.filesystem.tier,
            None => ctx.catalog.load_filesystem(&study.filesystem_key)?.tier,
        };

        let destination = FilesystemSelector::new(&self.monitor)
            .select_where(|info| info.filesystem.tier > current_tier)
            .ok_or_else(|| {
                StrataError::ResourceUnavailable(format!(
                    "no writable filesystem beyond {current_tier} for {}",
                    study.study_key
                ))
            })?;

        let mut batch = CommandProcessor::new(format!("migrate {}", study.study_key));
        batch.add_command(UpdateStudyFilesystemCommand::new(
            study.study_key.clone(),
            destination.key.clone(),
        ));
        batch.execute(ctx.catalog, ctx.cancel)?;
        info!(
            study = %study.study_key,
            from = %study.filesystem_key,
            to = %destination.key,
            "study migrated"
        );
        Ok(())
    }
}

/// Removes a study's storage record.
pub struct PurgeStudyHandler;

impl WorkHandler for PurgeStudyHandler {
    fn queue_type(&self) -> QueueType {
        QueueType::PurgeStudy
    }

    fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let key = study_key(ctx.entry)?;
        let mut batch = CommandProcessor::new(format!("purge {key}"));
        batch.add_command(DeleteStudyStorageCommand::new(key));
        match batch.execute(ctx.catalog, ctx.cancel) {
            Ok(_) => {
                info!(study = key, "study purged");
                Ok(())
            }
            Err(StrataError::CommandFailed { source, .. })
                if matches!(*source, StrataError::StudyNotFound(_)) =>
            {
                debug!(study = key, "study already purged");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

pub const JPEG_LOSSLESS: &str = "1.2.840.10008.1.2.4.70";
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";

const TRANSFER_SYNTAX: &str = "TransferSyntaxUid";
const META_SOURCE: &str = "meta";

/// Records a study as recompressed: its transfer syntax changes and, for lossy
/// compression, its size shrinks by the ratio the scheduling rule carried.
///
/// Studies already lossy-compressed are never rewritten as lossless.
pub struct CompressStudyHandler {
    queue_type: QueueType,
    transfer_syntax: &'static str,
}

impl CompressStudyHandler {
    pub fn lossless() -> Self {
        Self {
            queue_type: QueueType::LosslessCompress,
            transfer_syntax: JPEG_LOSSLESS,
        }
    }

    pub fn lossy() -> Self {
        Self {
            queue_type: QueueType::LossyCompress,
            transfer_syntax: JPEG_BASELINE,
        }
    }

    fn ratio(&self, entry: &WorkQueueEntry) -> Result<f64> {
        if self.queue_type != QueueType::LossyCompress {
            return Ok(1.0);
        }
        let ratio = entry
            .data
            .as_ref()
            .and_then(|data| data.get("ratio"))
            .and_then(serde_json::Value::as_f64);
        match ratio {
            Some(r) if r.is_finite() && r > 1.0 => Ok(r),
            _ => Err(StrataError::InvalidEntryData {
                id: entry.id.to_string(),
                reason: "lossy-compress needs a ratio greater than 1".to_string(),
            }),
        }
    }
}

fn transfer_syntax(study: &StudyStorage) -> Option<&str> {
    match study
        .sources
        .iter()
        .find_map(|s| s.attributes.get(TRANSFER_SYNTAX))
    {
        Some(AttributeValue::Text(uid)) => Some(uid.as_str()),
        _ => None,
    }
}

fn set_transfer_syntax(study: &mut StudyStorage, uid: &str) {
    let value = AttributeValue::text(uid);
    if let Some(source) = study
        .sources
        .iter_mut()
        .find(|s| s.attributes.contains_key(TRANSFER_SYNTAX))
    {
        source.attributes.insert(TRANSFER_SYNTAX.to_string(), value);
        return;
    }
    match study.sources.iter_mut().find(|s| s.name == META_SOURCE) {
        Some(meta) => {
            meta.attributes.insert(TRANSFER_SYNTAX.to_string(), value);
        }
        None => study
            .sources
            .push(AttributeSource::new(META_SOURCE).with(TRANSFER_SYNTAX, value)),
    }
}

impl WorkHandler for CompressStudyHandler {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let key = study_key(ctx.entry)?;
        let mut study = match ctx.catalog.load_study(key) {
            Ok(study) => study,
            Err(StrataError::StudyNotFound(_)) => {
                debug!(study = key, "study gone, nothing to compress");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let ratio = self.ratio(ctx.entry)?;

        let current = transfer_syntax(&study);
        if current == Some(self.transfer_syntax) || current == Some(JPEG_BASELINE) {
            debug!(study = key, syntax = ?current, "study already compressed");
            return Ok(());
        }

        let before = study.size_bytes;
        let after = (before as f64 / ratio).ceil() as u64;
        set_transfer_syntax(&mut study, self.transfer_syntax);
        study.size_bytes = after;

        let mut batch = CommandProcessor::new(format!("{} {key}", self.queue_type));
        batch.add_command(UpdateStudyStorageCommand::new(study));
        batch.execute(ctx.catalog, ctx.cancel)?;
        info!(
            study = key,
            syntax = self.transfer_syntax,
            before,
            after,
            "study compressed"
        );
        Ok(())
    }
}
