use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use strata_core::command::CancelToken;
use strata_core::filesystem::FilesystemMonitor;
use strata_core::service_lock::{JobRegistry, Scheduler, TickReport};
use strata_core::work_queue::{DrainReport, QueueWorker};

use crate::archive::Archive;
use crate::output::print_json;

/// Long-lived pieces of one worker, built once and reused across ticks.
pub struct Engine {
    pub worker_id: String,
    monitor: Arc<FilesystemMonitor>,
    registry: JobRegistry,
    queue: QueueWorker,
}

impl Engine {
    pub fn new(archive: &Archive) -> Self {
        let worker_id = archive.worker_id();
        let monitor = archive.monitor();
        let registry = archive.job_registry(&monitor);
        let queue = archive.queue_worker(&worker_id, &monitor);
        Self {
            worker_id,
            monitor,
            registry,
            queue,
        }
    }

    /// Run due service-lock jobs, then drain due work entries.
    pub fn tick(
        &self,
        archive: &Archive,
        cancel: &CancelToken,
    ) -> anyhow::Result<(TickReport, DrainReport)> {
        let scheduler = Scheduler::new(
            &archive.catalog,
            &self.registry,
            self.worker_id.as_str(),
            &archive.config.scheduler,
        );
        scheduler.seed_locks(Utc::now())?;
        let jobs = scheduler.tick(cancel)?;

        self.monitor.refresh(&archive.catalog)?;
        let drained = self.queue.drain(&archive.catalog, Utc::now(), cancel)?;
        Ok((jobs, drained))
    }
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let archive = Archive::open(root)?;
    let engine = Engine::new(&archive);
    let (jobs, drained) = engine.tick(&archive, &CancelToken::new())?;

    if json {
        print_json(&serde_json::json!({
            "worker_id": engine.worker_id,
            "jobs": {
                "claimed": jobs.claimed,
                "completed": jobs.completed,
                "failed": jobs.failed,
                "lost": jobs.lost,
            },
            "queue": {
                "completed": drained.completed,
                "retried": drained.retried,
                "failed": drained.failed,
                "lost": drained.lost,
            },
        }))?;
    } else {
        println!(
            "Jobs: {} claimed, {} completed, {} failed",
            jobs.claimed, jobs.completed, jobs.failed
        );
        println!(
            "Queue: {} completed, {} retried, {} failed",
            drained.completed, drained.retried, drained.failed
        );
    }
    Ok(())
}
