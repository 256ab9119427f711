//! Opening an initialized archive and wiring the engine around it.

use anyhow::Context;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::catalog::Catalog;
use strata_core::config::{Config, WarnLevel};
use strata_core::filesystem::FilesystemMonitor;
use strata_core::rule::YamlRuleSource;
use strata_core::service_lock::{
    FilesystemDeleteFactory, JobRegistry, QueueMaintenanceFactory, ReapplyRulesFactory, Scheduler,
};
use strata_core::work_queue::{
    CompressStudyHandler, PurgeStudyHandler, QueueWorker, TierMigrateHandler,
};

use crate::stats::DiskStatsProvider;

pub struct Archive {
    pub root: PathBuf,
    pub config: Config,
    pub catalog: Catalog,
}

impl Archive {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root).context("failed to load strata.yaml")?;
        for warning in config.validate() {
            match warning.level {
                WarnLevel::Error => tracing::error!("{}", warning.message),
                WarnLevel::Warning => tracing::warn!("{}", warning.message),
            }
        }
        let db = config.database_path(root);
        let catalog =
            Catalog::open(&db).with_context(|| format!("failed to open {}", db.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            catalog,
        })
    }

    /// Configured worker id, or `<host>-<pid>`.
    pub fn worker_id(&self) -> String {
        self.config
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", host_name(), std::process::id()))
    }

    pub fn monitor(&self) -> Arc<FilesystemMonitor> {
        Arc::new(FilesystemMonitor::new(Arc::new(DiskStatsProvider)))
    }

    /// Every built-in job, sharing `monitor`.
    pub fn job_registry(&self, monitor: &Arc<FilesystemMonitor>) -> JobRegistry {
        let rules = Arc::new(YamlRuleSource::new(self.config.rules_path(&self.root)));
        let mut registry = JobRegistry::new();
        registry.register(ReapplyRulesFactory::new(
            rules,
            self.config.reapply_rules.interval(),
        ));
        registry.register(FilesystemDeleteFactory::new(
            Arc::clone(monitor),
            self.config.filesystem_delete.clone(),
        ));
        registry.register(QueueMaintenanceFactory::new(self.config.work_queue.clone()));
        registry
    }

    /// Create lock records for any filesystem or job type that lacks one.
    pub fn seed_locks(&self) -> anyhow::Result<usize> {
        let monitor = self.monitor();
        let registry = self.job_registry(&monitor);
        let scheduler = Scheduler::new(
            &self.catalog,
            &registry,
            self.worker_id(),
            &self.config.scheduler,
        );
        scheduler
            .seed_locks(Utc::now())
            .context("failed to seed service locks")
    }

    pub fn queue_worker(&self, worker_id: &str, monitor: &Arc<FilesystemMonitor>) -> QueueWorker {
        let mut worker = QueueWorker::new(worker_id, &self.config.work_queue);
        worker.register(TierMigrateHandler::new(Arc::clone(monitor)));
        worker.register(PurgeStudyHandler);
        worker.register(CompressStudyHandler::lossless());
        worker.register(CompressStudyHandler::lossy());
        worker
    }
}

fn host_name() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "strata".to_string();
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    match String::from_utf8_lossy(&buf[..end]).trim() {
        "" => "strata".to_string(),
        name => name.to_string(),
    }
}
