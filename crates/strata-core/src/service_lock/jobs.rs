//! Built-in recurring jobs.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::action::ActionContext;
use crate::command::{
    CommandProcessor, DeleteStudyQueueCommand, DeleteWorkQueueCommand, InsertWorkQueueCommand,
};
use crate::config::{FilesystemDeleteConfig, WorkQueueConfig};
use crate::error::{Result, StrataError};
use crate::filesystem::{FilesystemInfo, FilesystemMonitor};
use crate::rule::{RuleSource, RulesEngine};
use crate::study::StudyStorage;
use crate::types::{QueueType, ServiceLockType};
use crate::work_queue::db::RetryPolicy;
use crate::work_queue::WorkQueueEntry;

use super::scheduler::{JobContext, JobFactory, ServiceLockJob};

// ---------------------------------------------------------------------------
// filesystem-reapply-rules
// ---------------------------------------------------------------------------

pub struct ReapplyRulesFactory {
    source: Arc<dyn RuleSource>,
    interval: Duration,
}

impl ReapplyRulesFactory {
    pub fn new(source: Arc<dyn RuleSource>, interval: Duration) -> Self {
        Self { source, interval }
    }
}

impl JobFactory for ReapplyRulesFactory {
    fn lock_type(&self) -> ServiceLockType {
        ServiceLockType::FilesystemReapplyRules
    }

    fn create(&self) -> Box<dyn ServiceLockJob> {
        Box::new(ReapplyRulesJob {
            source: Arc::clone(&self.source),
            interval: self.interval,
        })
    }
}

/// Re-evaluates every study on one filesystem, replacing each study's pending
/// rule-driven work with whatever the current rules schedule.
pub struct ReapplyRulesJob {
    source: Arc<dyn RuleSource>,
    interval: Duration,
}

impl ServiceLockJob for ReapplyRulesJob {
    fn run(&mut self, ctx: &JobContext<'_>) -> Result<DateTime<Utc>> {
        let filesystem_key = ctx.filesystem_key()?;
        let engine = RulesEngine::new(self.source.rules(ServiceLockType::FilesystemReapplyRules)?);
        let studies = ctx.catalog.studies_on_filesystem(filesystem_key)?;

        let (mut applied, mut skipped) = (0usize, 0usize);
        for study in &studies {
            ctx.checkpoint()?;
            match reapply(ctx, &engine, filesystem_key, study) {
                Ok(()) => applied += 1,
                Err(e @ (StrataError::Cancelled | StrataError::ClaimLost(_))) => return Err(e),
                Err(e) => {
                    warn!(study = %study.study_key, error = %e, "rules not applied to study");
                    skipped += 1;
                }
            }
        }

        info!(filesystem = filesystem_key, applied, skipped, "rules reapplied");
        Ok(ctx.now + self.interval)
    }
}

fn reapply(
    ctx: &JobContext<'_>,
    engine: &RulesEngine,
    filesystem_key: &str,
    study: &StudyStorage,
) -> Result<()> {
    let subject = study.subject();
    let mut batch = CommandProcessor::new(format!("reapply rules to {}", study.study_key));
    batch.add_command(DeleteStudyQueueCommand::new(
        study.study_key.clone(),
        QueueType::rule_driven(),
    ));
    let outcome = {
        let mut action_ctx = ActionContext {
            subject: &subject,
            now: ctx.now,
            filesystem_key: Some(filesystem_key),
            study_key: Some(&study.study_key),
            processor: &mut batch,
        };
        engine.execute(&mut action_ctx)?
    };
    batch.execute(ctx.catalog, ctx.cancel)?;
    debug!(study = %study.study_key, rules = ?outcome.applied, "study rules applied");
    Ok(())
}

// ---------------------------------------------------------------------------
// filesystem-delete
// ---------------------------------------------------------------------------

pub struct FilesystemDeleteFactory {
    monitor: Arc<FilesystemMonitor>,
    config: FilesystemDeleteConfig,
}

impl FilesystemDeleteFactory {
    pub fn new(monitor: Arc<FilesystemMonitor>, config: FilesystemDeleteConfig) -> Self {
        Self { monitor, config }
    }
}

impl JobFactory for FilesystemDeleteFactory {
    fn lock_type(&self) -> ServiceLockType {
        ServiceLockType::FilesystemDelete
    }

    fn create(&self) -> Box<dyn ServiceLockJob> {
        Box::new(FilesystemDeleteJob {
            monitor: Arc::clone(&self.monitor),
            config: self.config.clone(),
        })
    }
}

/// Frees space on a filesystem above its high watermark by turning due
/// StudyDelete candidates into PurgeStudy work.
pub struct FilesystemDeleteJob {
    monitor: Arc<FilesystemMonitor>,
    config: FilesystemDeleteConfig,
}

impl ServiceLockJob for FilesystemDeleteJob {
    fn run(&mut self, ctx: &JobContext<'_>) -> Result<DateTime<Utc>> {
        let filesystem_key = ctx.filesystem_key()?;
        self.monitor.refresh(ctx.catalog)?;
        let info = self
            .monitor
            .get(filesystem_key)
            .ok_or_else(|| StrataError::FilesystemNotFound(filesystem_key.to_string()))?;

        if !info.is_online() {
            debug!(filesystem = filesystem_key, "filesystem offline, nothing to purge");
            return Ok(ctx.now + self.config.idle_delay());
        }
        ctx.catalog
            .record_filesystem_usage(filesystem_key, info.used_percent())?;

        if info.above_high_watermark() {
            return match self.schedule_purges(ctx, &info) {
                Ok(()) => Ok(ctx.now + self.config.idle_delay()),
                Err(e @ (StrataError::Cancelled | StrataError::ClaimLost(_))) => Err(e),
                Err(e) => {
                    warn!(filesystem = filesystem_key, error = %e, "purge pass failed");
                    Ok(ctx.now + self.config.error_delay())
                }
            };
        }

        if info.above_low_watermark() {
            Ok(ctx.now + self.config.busy_delay())
        } else {
            Ok(ctx.now + self.config.idle_delay())
        }
    }
}

impl FilesystemDeleteJob {
    fn schedule_purges(&self, ctx: &JobContext<'_>, info: &FilesystemInfo) -> Result<()> {
        let filesystem_key = info.filesystem.key.as_str();
        let target = info.bytes_to_remove();
        let mut scheduled_bytes = 0u64;
        let mut purges = 0usize;

        'rounds: while scheduled_bytes < target {
            let candidates = ctx.catalog.due_work_queue_on_filesystem(
                QueueType::StudyDelete,
                filesystem_key,
                ctx.now,
                self.config.batch_size.max(1),
            )?;
            if candidates.is_empty() {
                break;
            }
            for candidate in candidates {
                ctx.checkpoint()?;
                let freed = self.consume_candidate(ctx, filesystem_key, &candidate)?;
                if freed > 0 {
                    purges += 1;
                }
                scheduled_bytes = scheduled_bytes.saturating_add(freed);
                if scheduled_bytes >= target {
                    break 'rounds;
                }
            }
        }

        if scheduled_bytes < target {
            warn!(
                filesystem = filesystem_key,
                target,
                scheduled_bytes,
                "not enough delete candidates to reach the low watermark"
            );
        }
        info!(filesystem = filesystem_key, purges, scheduled_bytes, "purges scheduled");
        Ok(())
    }

    /// Replace one candidate with a purge entry in a single batch. Candidates
    /// whose study is gone or lives elsewhere are dropped. Returns bytes scheduled.
    fn consume_candidate(
        &self,
        ctx: &JobContext<'_>,
        filesystem_key: &str,
        candidate: &WorkQueueEntry,
    ) -> Result<u64> {
        let study = match candidate.study_key.as_deref() {
            Some(key) => match ctx.catalog.load_study(key) {
                Ok(study) if study.filesystem_key == filesystem_key => Some(study),
                Ok(_) | Err(StrataError::StudyNotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        let mut batch = CommandProcessor::new(format!("schedule purge for {}", candidate.id));
        if let Some(study) = &study {
            let purge = WorkQueueEntry::new(
                QueueType::PurgeStudy,
                ctx.now + self.config.purge_delay(),
            )
            .for_study(study.study_key.clone())
            .on_filesystem(filesystem_key);
            batch.add_command(InsertWorkQueueCommand::new(purge));
        } else {
            debug!(entry = %candidate.id, "dropping stale delete candidate");
        }
        batch.add_command(DeleteWorkQueueCommand::new(candidate.id));
        batch.execute(ctx.catalog, ctx.cancel)?;

        Ok(study.map(|s| s.size_bytes).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// queue-maintenance
// ---------------------------------------------------------------------------

pub struct QueueMaintenanceFactory {
    config: WorkQueueConfig,
}

impl QueueMaintenanceFactory {
    pub fn new(config: WorkQueueConfig) -> Self {
        Self { config }
    }
}

impl JobFactory for QueueMaintenanceFactory {
    fn lock_type(&self) -> ServiceLockType {
        ServiceLockType::QueueMaintenance
    }

    fn create(&self) -> Box<dyn ServiceLockJob> {
        Box::new(QueueMaintenanceJob {
            config: self.config.clone(),
        })
    }
}

/// Recovers entries abandoned by crashed workers and expires completed ones.
pub struct QueueMaintenanceJob {
    config: WorkQueueConfig,
}

impl ServiceLockJob for QueueMaintenanceJob {
    fn run(&mut self, ctx: &JobContext<'_>) -> Result<DateTime<Utc>> {
        let policy = RetryPolicy::from(&self.config);
        let recovered = ctx.catalog.recover_stuck_work_queue(
            ctx.now - self.config.stuck_after(),
            &policy,
            ctx.now,
        )?;
        let expired = ctx
            .catalog
            .purge_completed_work_queue(ctx.now - self.config.completed_retention())?;
        if recovered > 0 || expired > 0 {
            info!(recovered, expired, "work queue maintained");
        }
        Ok(ctx.now + self.config.maintenance_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeValue;
    use crate::catalog::Catalog;
    use crate::command::CancelToken;
    use crate::filesystem::Filesystem;
    use crate::rule::{RulesFile, RULES_TEMPLATE};
    use crate::service_lock::ServiceLock;
    use crate::subject::AttributeSource;
    use crate::testing::FixedStats;
    use crate::types::FilesystemTier;
    use crate::work_queue::WorkQueueStatus;
    use chrono::TimeZone;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn run(job: &mut dyn ServiceLockJob, catalog: &Catalog, lock: &ServiceLock) -> Result<DateTime<Utc>> {
        let cancel = CancelToken::new();
        let ttl = Duration::minutes(10);
        catalog.seed_service_lock(lock).unwrap();
        // Already held by w1 on a second pass; held by someone else in takeover tests.
        catalog.claim_service_lock(&lock.key, "w1", t0(), ttl).unwrap();
        let ctx = JobContext::new(catalog, lock, t0(), &cancel, "w1", ttl);
        job.run(&ctx)
    }

    fn study(key: &str, fs: &str, size: u64, modality: &str) -> StudyStorage {
        StudyStorage::new(
            key,
            fs,
            size,
            vec![AttributeSource::new("dataset")
                .with("Modality", AttributeValue::text(modality))
                .with("StudyDescription", AttributeValue::text("ROUTINE"))
                .with("StudyDate", AttributeValue::text("20240101"))],
        )
    }

    fn catalog_with(fs: &[&str]) -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        for key in fs {
            catalog
                .insert_filesystem(&Filesystem::new(*key, format!("/{key}"), FilesystemTier::Tier1))
                .unwrap();
        }
        catalog
    }

    // -- reapply rules ------------------------------------------------------

    fn reapply_job() -> Box<dyn ServiceLockJob> {
        let rules = RulesFile::parse(RULES_TEMPLATE).unwrap();
        ReapplyRulesFactory::new(Arc::new(rules), Duration::days(1)).create()
    }

    #[test]
    fn reapply_replaces_pending_rule_driven_work() {
        let catalog = catalog_with(&["fs1"]);
        catalog.insert_study(&study("mr", "fs1", 100, "MR")).unwrap();
        catalog.insert_study(&study("ct", "fs1", 100, "CT")).unwrap();
        let stale = WorkQueueEntry::new(QueueType::TierMigrate, t0()).for_study("mr");
        let purge = WorkQueueEntry::new(QueueType::PurgeStudy, t0()).for_study("mr");
        catalog.insert_work_queue(&stale).unwrap();
        catalog.insert_work_queue(&purge).unwrap();

        let lock = ServiceLock::new(ServiceLockType::FilesystemReapplyRules, Some("fs1".into()), t0());
        let mut job = reapply_job();
        let next = run(job.as_mut(), &catalog, &lock).unwrap();
        assert_eq!(next, t0() + Duration::days(1));

        assert!(catalog.load_work_queue(stale.id).is_err());
        assert!(catalog.load_work_queue(purge.id).is_ok());

        let migrations = catalog.list_work_queue(Some(QueueType::TierMigrate)).unwrap();
        assert_eq!(migrations.len(), 2);
        let mr = migrations
            .iter()
            .find(|e| e.study_key.as_deref() == Some("mr"))
            .unwrap();
        assert_eq!(mr.scheduled_time, Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap());
        assert_eq!(mr.filesystem_key.as_deref(), Some("fs1"));
        let ct = migrations
            .iter()
            .find(|e| e.study_key.as_deref() == Some("ct"))
            .unwrap();
        assert_eq!(ct.scheduled_time, t0() + Duration::days(90));

        // A second pass replaces rather than accumulates.
        run(job.as_mut(), &catalog, &lock).unwrap();
        assert_eq!(catalog.list_work_queue(Some(QueueType::TierMigrate)).unwrap().len(), 2);
        assert_eq!(catalog.list_work_queue(Some(QueueType::StudyDelete)).unwrap().len(), 2);
    }

    #[test]
    fn reapply_only_touches_studies_on_its_filesystem() {
        let catalog = catalog_with(&["fs1", "fs2"]);
        catalog.insert_study(&study("a", "fs1", 100, "CT")).unwrap();
        catalog.insert_study(&study("b", "fs2", 100, "CT")).unwrap();
        let lock = ServiceLock::new(ServiceLockType::FilesystemReapplyRules, Some("fs2".into()), t0());
        run(reapply_job().as_mut(), &catalog, &lock).unwrap();
        let entries = catalog.list_work_queue(None).unwrap();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e.study_key.as_deref() == Some("b")));
    }

    #[test]
    fn reapply_skips_studies_whose_rules_fail() {
        // Shifting the far-future study date overflows the calendar.
        let yaml = r#"
filesystem-reapply-rules:
  - name: date-based
    rule_type: tier1-retention
    actions:
      - type: tier1-retention
        time: 253000
        unit: years
        reference: $StudyDate
"#;
        let rules = RulesFile::parse(yaml).unwrap();
        let mut job = ReapplyRulesFactory::new(Arc::new(rules), Duration::days(1)).create();
        let catalog = catalog_with(&["fs1"]);
        let mut far = study("far", "fs1", 100, "CT");
        far.sources = vec![AttributeSource::new("dataset")
            .with("StudyDate", AttributeValue::text("99991231"))];
        catalog.insert_study(&far).unwrap();
        catalog.insert_study(&study("ok", "fs1", 100, "CT")).unwrap();

        let lock = ServiceLock::new(ServiceLockType::FilesystemReapplyRules, Some("fs1".into()), t0());
        assert!(run(job.as_mut(), &catalog, &lock).is_ok());
        let entries = catalog.list_work_queue(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].study_key.as_deref(), Some("ok"));
    }

    #[test]
    fn reapply_stops_once_another_worker_holds_the_lock() {
        let catalog = catalog_with(&["fs1"]);
        catalog.insert_study(&study("mr", "fs1", 100, "MR")).unwrap();
        let lock = ServiceLock::new(ServiceLockType::FilesystemReapplyRules, Some("fs1".into()), t0());
        catalog.seed_service_lock(&lock).unwrap();
        assert!(catalog
            .claim_service_lock(&lock.key, "w2", t0(), Duration::minutes(10))
            .unwrap());

        assert!(matches!(
            run(reapply_job().as_mut(), &catalog, &lock),
            Err(StrataError::ClaimLost(_))
        ));
        assert!(catalog.list_work_queue(None).unwrap().is_empty());
    }

    #[test]
    fn reapply_requires_filesystem_scope() {
        let catalog = catalog_with(&[]);
        let lock = ServiceLock::new(ServiceLockType::FilesystemReapplyRules, None, t0());
        assert!(matches!(
            run(reapply_job().as_mut(), &catalog, &lock),
            Err(StrataError::LockScope(_))
        ));
    }

    // -- filesystem delete --------------------------------------------------

    fn delete_job(stats: FixedStats) -> Box<dyn ServiceLockJob> {
        let monitor = Arc::new(FilesystemMonitor::new(Arc::new(stats)));
        FilesystemDeleteFactory::new(monitor, FilesystemDeleteConfig::default()).create()
    }

    fn delete_candidate(catalog: &Catalog, study: &str, hours_ago: i64) -> WorkQueueEntry {
        let entry = WorkQueueEntry::new(QueueType::StudyDelete, t0() - Duration::hours(hours_ago))
            .for_study(study)
            .on_filesystem("fs1");
        catalog.insert_work_queue(&entry).unwrap();
        entry
    }

    fn delete_lock() -> ServiceLock {
        ServiceLock::new(ServiceLockType::FilesystemDelete, Some("fs1".into()), t0())
    }

    #[test]
    fn above_high_watermark_schedules_purges_until_covered() {
        let catalog = catalog_with(&["fs1"]);
        let mut candidates = Vec::new();
        for (i, key) in ["s1", "s2", "s3"].iter().enumerate() {
            catalog.insert_study(&study(key, "fs1", 10 * GIB, "CT")).unwrap();
            candidates.push(delete_candidate(&catalog, key, 3 - i as i64));
        }

        // 95% used; 15 GiB must go to get back to the 80% low watermark.
        let stats = FixedStats::default().with("fs1", 100 * GIB, 5 * GIB);
        let next = run(delete_job(stats).as_mut(), &catalog, &delete_lock()).unwrap();
        assert_eq!(next, t0() + FilesystemDeleteConfig::default().idle_delay());

        let purges = catalog.list_work_queue(Some(QueueType::PurgeStudy)).unwrap();
        let mut purged: Vec<_> = purges.iter().filter_map(|e| e.study_key.clone()).collect();
        purged.sort();
        assert_eq!(purged, vec!["s1", "s2"]);
        assert!(purges
            .iter()
            .all(|e| e.scheduled_time == t0() + FilesystemDeleteConfig::default().purge_delay()));

        assert!(catalog.load_work_queue(candidates[0].id).is_err());
        assert!(catalog.load_work_queue(candidates[1].id).is_err());
        assert_eq!(
            catalog.load_work_queue(candidates[2].id).unwrap().status,
            WorkQueueStatus::Pending
        );
    }

    #[test]
    fn stale_candidates_are_dropped_without_purging() {
        let catalog = catalog_with(&["fs1", "fs2"]);
        catalog.insert_study(&study("moved", "fs2", 10 * GIB, "CT")).unwrap();
        let gone = delete_candidate(&catalog, "ghost", 2);
        let moved = delete_candidate(&catalog, "moved", 1);

        let stats = FixedStats::default()
            .with("fs1", 100 * GIB, 5 * GIB)
            .with("fs2", 100 * GIB, 50 * GIB);
        run(delete_job(stats).as_mut(), &catalog, &delete_lock()).unwrap();

        assert!(catalog.load_work_queue(gone.id).is_err());
        assert!(catalog.load_work_queue(moved.id).is_err());
        assert!(catalog.list_work_queue(Some(QueueType::PurgeStudy)).unwrap().is_empty());
    }

    #[test]
    fn between_watermarks_reschedules_sooner_without_purging() {
        let catalog = catalog_with(&["fs1"]);
        catalog.insert_study(&study("s1", "fs1", 10 * GIB, "CT")).unwrap();
        let candidate = delete_candidate(&catalog, "s1", 1);

        let stats = FixedStats::default().with("fs1", 100 * GIB, 15 * GIB);
        let next = run(delete_job(stats).as_mut(), &catalog, &delete_lock()).unwrap();
        assert_eq!(next, t0() + FilesystemDeleteConfig::default().busy_delay());
        assert!(catalog.load_work_queue(candidate.id).is_ok());
    }

    #[test]
    fn below_low_watermark_is_idle() {
        let catalog = catalog_with(&["fs1"]);
        let stats = FixedStats::default().with("fs1", 100 * GIB, 50 * GIB);
        let next = run(delete_job(stats).as_mut(), &catalog, &delete_lock()).unwrap();
        assert_eq!(next, t0() + FilesystemDeleteConfig::default().idle_delay());
    }

    #[test]
    fn each_pass_records_usage_on_the_filesystem() {
        let catalog = catalog_with(&["fs1"]);
        let stats = FixedStats::default().with("fs1", 100 * GIB, 25 * GIB);
        run(delete_job(stats).as_mut(), &catalog, &delete_lock()).unwrap();
        assert_eq!(catalog.load_filesystem("fs1").unwrap().percent_full, Some(75.0));

        // Offline volumes keep the last observed value.
        run(delete_job(FixedStats::default()).as_mut(), &catalog, &delete_lock()).unwrap();
        assert_eq!(catalog.load_filesystem("fs1").unwrap().percent_full, Some(75.0));
    }

    #[test]
    fn purge_pass_stops_once_another_worker_holds_the_lock() {
        let catalog = catalog_with(&["fs1"]);
        catalog.insert_study(&study("s1", "fs1", 10 * GIB, "CT")).unwrap();
        let candidate = delete_candidate(&catalog, "s1", 1);
        let lock = delete_lock();
        catalog.seed_service_lock(&lock).unwrap();
        assert!(catalog
            .claim_service_lock(&lock.key, "w2", t0(), Duration::minutes(10))
            .unwrap());

        let stats = FixedStats::default().with("fs1", 100 * GIB, 5 * GIB);
        assert!(matches!(
            run(delete_job(stats).as_mut(), &catalog, &lock),
            Err(StrataError::ClaimLost(_))
        ));
        assert!(catalog.list_work_queue(Some(QueueType::PurgeStudy)).unwrap().is_empty());
        assert!(catalog.load_work_queue(candidate.id).is_ok());
    }

    #[test]
    fn unknown_filesystem_fails_the_run() {
        let catalog = catalog_with(&[]);
        assert!(matches!(
            run(delete_job(FixedStats::default()).as_mut(), &catalog, &delete_lock()),
            Err(StrataError::FilesystemNotFound(_))
        ));
    }

    // -- queue maintenance --------------------------------------------------

    #[test]
    fn maintenance_recovers_stuck_and_expires_completed() {
        let catalog = catalog_with(&[]);
        let long_ago = t0() - Duration::days(8);

        let stuck = WorkQueueEntry::new(QueueType::PurgeStudy, long_ago).for_study("a");
        catalog.insert_work_queue(&stuck).unwrap();
        assert!(catalog.claim_work_queue(stuck.id, "crashed", long_ago).unwrap());

        let done = WorkQueueEntry::new(QueueType::PurgeStudy, long_ago).for_study("b");
        catalog.insert_work_queue(&done).unwrap();
        assert!(catalog.claim_work_queue(done.id, "w1", long_ago).unwrap());
        catalog.complete_work_queue(done.id, "w1", long_ago).unwrap();

        let fresh = WorkQueueEntry::new(QueueType::PurgeStudy, t0()).for_study("c");
        catalog.insert_work_queue(&fresh).unwrap();
        assert!(catalog.claim_work_queue(fresh.id, "w1", t0()).unwrap());

        let config = WorkQueueConfig::default();
        let mut job = QueueMaintenanceFactory::new(config.clone()).create();
        let lock = ServiceLock::new(ServiceLockType::QueueMaintenance, None, t0());
        let next = run(job.as_mut(), &catalog, &lock).unwrap();
        assert_eq!(next, t0() + config.maintenance_interval());

        let recovered = catalog.load_work_queue(stuck.id).unwrap();
        assert_eq!(recovered.status, WorkQueueStatus::Pending);
        assert_eq!(recovered.retry_count, 1);
        assert!(catalog.load_work_queue(done.id).is_err());
        assert_eq!(
            catalog.load_work_queue(fresh.id).unwrap().status,
            WorkQueueStatus::InProgress
        );
    }
}
