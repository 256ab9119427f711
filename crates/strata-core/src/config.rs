use crate::error::{Result, StrataError};
use crate::paths;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks in `strata run`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How long a claim stays valid before another worker may take the lock.
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_secs: u64,
    /// Delay before a job that failed becomes eligible again.
    #[serde(default = "default_failure_retry")]
    pub failure_retry_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_claim_ttl() -> u64 {
    600
}

fn default_failure_retry() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            claim_ttl_secs: default_claim_ttl(),
            failure_retry_secs: default_failure_retry(),
        }
    }
}

impl SchedulerConfig {
    pub fn claim_ttl(&self) -> Duration {
        secs(self.claim_ttl_secs)
    }

    pub fn failure_retry(&self) -> Duration {
        secs(self.failure_retry_secs)
    }
}

// ---------------------------------------------------------------------------
// ReapplyRulesConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReapplyRulesConfig {
    #[serde(default = "default_reapply_interval")]
    pub interval_secs: u64,
}

fn default_reapply_interval() -> u64 {
    24 * 60 * 60
}

impl Default for ReapplyRulesConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reapply_interval(),
        }
    }
}

impl ReapplyRulesConfig {
    pub fn interval(&self) -> Duration {
        secs(self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// FilesystemDeleteConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemDeleteConfig {
    /// Reschedule delay after a run above the high watermark, or below the low one.
    #[serde(default = "default_delete_idle_delay")]
    pub idle_delay_secs: u64,
    /// Reschedule delay while still above the low watermark.
    #[serde(default = "default_delete_busy_delay")]
    pub busy_delay_secs: u64,
    /// Reschedule delay after a failed purge pass.
    #[serde(default = "default_delete_error_delay")]
    pub error_delay_secs: u64,
    /// Delay between creating a purge entry and its eligibility.
    #[serde(default = "default_purge_delay")]
    pub purge_delay_secs: u64,
    /// Candidates fetched per round.
    #[serde(default = "default_delete_batch")]
    pub batch_size: usize,
}

fn default_delete_idle_delay() -> u64 {
    10 * 60
}

fn default_delete_busy_delay() -> u64 {
    5 * 60
}

fn default_delete_error_delay() -> u64 {
    60
}

fn default_purge_delay() -> u64 {
    10
}

fn default_delete_batch() -> usize {
    100
}

impl Default for FilesystemDeleteConfig {
    fn default() -> Self {
        Self {
            idle_delay_secs: default_delete_idle_delay(),
            busy_delay_secs: default_delete_busy_delay(),
            error_delay_secs: default_delete_error_delay(),
            purge_delay_secs: default_purge_delay(),
            batch_size: default_delete_batch(),
        }
    }
}

impl FilesystemDeleteConfig {
    pub fn idle_delay(&self) -> Duration {
        secs(self.idle_delay_secs)
    }

    pub fn busy_delay(&self) -> Duration {
        secs(self.busy_delay_secs)
    }

    pub fn error_delay(&self) -> Duration {
        secs(self.error_delay_secs)
    }

    pub fn purge_delay(&self) -> Duration {
        secs(self.purge_delay_secs)
    }
}

// ---------------------------------------------------------------------------
// WorkQueueConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkQueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay; doubled for every retry already consumed.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_queue_batch")]
    pub batch_size: usize,
    /// In-progress entries older than this are considered abandoned.
    #[serde(default = "default_stuck_after")]
    pub stuck_after_secs: u64,
    #[serde(default = "default_completed_retention")]
    pub completed_retention_hours: u64,
    /// Seconds between queue-maintenance runs.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    30
}

fn default_queue_batch() -> usize {
    50
}

fn default_stuck_after() -> u64 {
    30 * 60
}

fn default_completed_retention() -> u64 {
    7 * 24
}

fn default_maintenance_interval() -> u64 {
    5 * 60
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff(),
            batch_size: default_queue_batch(),
            stuck_after_secs: default_stuck_after(),
            completed_retention_hours: default_completed_retention(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

impl WorkQueueConfig {
    pub fn retry_backoff(&self) -> Duration {
        secs(self.retry_backoff_secs)
    }

    pub fn stuck_after(&self) -> Duration {
        secs(self.stuck_after_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        secs(self.completed_retention_hours.saturating_mul(3600))
    }

    pub fn maintenance_interval(&self) -> Duration {
        secs(self.maintenance_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,
    /// Identity recorded on claimed locks and queue entries. Falls back to the host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub reapply_rules: ReapplyRulesConfig,
    #[serde(default)]
    pub filesystem_delete: FilesystemDeleteConfig,
    #[serde(default)]
    pub work_queue: WorkQueueConfig,
}

fn default_database() -> PathBuf {
    PathBuf::from(paths::DATABASE_FILE)
}

fn default_rules_file() -> PathBuf {
    PathBuf::from(paths::RULES_FILE)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            database: default_database(),
            rules_file: default_rules_file(),
            worker_id: None,
            scheduler: SchedulerConfig::default(),
            reapply_rules: ReapplyRulesConfig::default(),
            filesystem_delete: FilesystemDeleteConfig::default(),
            work_queue: WorkQueueConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(StrataError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn database_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.database)
    }

    pub fn rules_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.rules_file)
    }

    /// Check the config for suspicious values. Returns an empty vec when clean.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.scheduler.claim_ttl_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "scheduler.claim_ttl_secs is 0; locks would never stay claimed"
                    .to_string(),
            });
        }

        if self.scheduler.poll_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "scheduler.poll_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.scheduler.claim_ttl_secs < self.scheduler.poll_interval_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "scheduler.claim_ttl_secs ({}) is shorter than poll_interval_secs ({}); \
                     long jobs may be claimed twice",
                    self.scheduler.claim_ttl_secs, self.scheduler.poll_interval_secs
                ),
            });
        }

        if self.work_queue.max_retries > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "work_queue.max_retries={} (>10 is unusual)",
                    self.work_queue.max_retries
                ),
            });
        }

        if self.work_queue.batch_size == 0 || self.filesystem_delete.batch_size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "batch sizes must be greater than 0".to_string(),
            });
        }

        if matches!(&self.worker_id, Some(id) if id.trim().is_empty()) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "worker_id is empty; the host name will be used".to_string(),
            });
        }

        warnings
    }
}

/// Longest interval any setting can express; keeps `now + interval` representable.
const MAX_INTERVAL_SECS: u64 = 100 * 366 * 24 * 60 * 60;

fn secs(value: u64) -> Duration {
    Duration::try_seconds(value.min(MAX_INTERVAL_SECS) as i64).unwrap_or(Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn config_roundtrip_through_disk() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.worker_id = Some("worker-7".to_string());
        cfg.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.worker_id.as_deref(), Some("worker-7"));
        assert_eq!(loaded.database, PathBuf::from("strata.db"));
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(StrataError::NotInitialized)
        ));
    }

    #[test]
    fn sparse_yaml_fills_defaults() {
        let yaml = "version: 1\nwork_queue:\n  max_retries: 5\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.work_queue.max_retries, 5);
        assert_eq!(cfg.work_queue.retry_backoff_secs, 30);
        assert_eq!(cfg.scheduler.claim_ttl_secs, 600);
        assert_eq!(cfg.filesystem_delete.busy_delay_secs, 300);
        assert_eq!(cfg.rules_file, PathBuf::from("rules.yaml"));
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_zero_claim_ttl() {
        let mut cfg = Config::default();
        cfg.scheduler.claim_ttl_secs = 0;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("claim_ttl_secs")));
    }

    #[test]
    fn validate_flags_excessive_retries() {
        let mut cfg = Config::default();
        cfg.work_queue.max_retries = 25;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("max_retries=25"));
    }

    #[test]
    fn oversized_intervals_are_clamped() {
        let scheduler = SchedulerConfig {
            claim_ttl_secs: u64::MAX,
            ..SchedulerConfig::default()
        };
        let queue = WorkQueueConfig {
            completed_retention_hours: u64::MAX,
            ..WorkQueueConfig::default()
        };
        assert_eq!(scheduler.claim_ttl(), Duration::seconds(MAX_INTERVAL_SECS as i64));
        assert_eq!(queue.completed_retention(), scheduler.claim_ttl());
        // Still usable as an offset from the current time.
        assert!(Utc::now().checked_add_signed(scheduler.claim_ttl()).is_some());
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let cfg = Config::default();
        let root = Path::new("/archive");
        assert_eq!(cfg.database_path(root), PathBuf::from("/archive/strata.db"));
        assert_eq!(cfg.rules_path(root), PathBuf::from("/archive/rules.yaml"));
    }
}
