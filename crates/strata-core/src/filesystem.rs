//! Filesystem model, live monitoring and target selection.
//!
//! The monitor is the single role that polls volume statistics; everything
//! else reads snapshots from it. Selection always works on a snapshot taken at
//! selection time, so flag changes made mid-scan are honoured.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::error::Result;
use crate::types::FilesystemTier;

/// Selection is refused when the chosen filesystem has less free space than this.
pub const MINIMUM_RESERVE_BYTES: u64 = 1024 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Filesystem (configuration)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filesystem {
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub path: PathBuf,
    pub tier: FilesystemTier,
    pub enabled: bool,
    pub read_only: bool,
    pub write_only: bool,
    /// Percent full above which studies are purged.
    pub high_watermark: f64,
    /// Percent full the purge aims to return to.
    pub low_watermark: f64,
    /// Usage recorded by the last filesystem-delete pass; never set by administrators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_full: Option<f64>,
}

impl Filesystem {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>, tier: FilesystemTier) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            path: path.into(),
            tier,
            enabled: true,
            read_only: false,
            write_only: false,
            high_watermark: 90.0,
            low_watermark: 80.0,
            percent_full: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Source of live volume statistics. A failed poll marks the volume offline.
pub trait StatsProvider: Send + Sync {
    fn poll(&self, filesystem: &Filesystem) -> Result<VolumeStats>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Unknown,
    Online,
    Offline,
}

// ---------------------------------------------------------------------------
// FilesystemInfo (configuration + live state)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilesystemInfo {
    pub filesystem: Filesystem,
    pub availability: Availability,
    pub stats: Option<VolumeStats>,
}

impl FilesystemInfo {
    pub fn unknown(filesystem: Filesystem) -> Self {
        Self {
            filesystem,
            availability: Availability::Unknown,
            stats: None,
        }
    }

    pub fn online(filesystem: Filesystem, stats: VolumeStats) -> Self {
        Self {
            filesystem,
            availability: Availability::Online,
            stats: Some(stats),
        }
    }

    pub fn is_online(&self) -> bool {
        self.availability == Availability::Online
    }

    pub fn free_bytes(&self) -> u64 {
        self.stats.map_or(0, |s| s.free_bytes)
    }

    pub fn total_bytes(&self) -> u64 {
        self.stats.map_or(0, |s| s.total_bytes)
    }

    pub fn used_percent(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(self.free_bytes());
        used as f64 * 100.0 / total as f64
    }

    /// Online, enabled and not read-only.
    pub fn is_writable(&self) -> bool {
        self.is_online() && self.filesystem.enabled && !self.filesystem.read_only
    }

    pub fn above_high_watermark(&self) -> bool {
        self.is_online() && self.used_percent() > self.filesystem.high_watermark
    }

    pub fn above_low_watermark(&self) -> bool {
        self.is_online() && self.used_percent() > self.filesystem.low_watermark
    }

    /// Bytes that must be freed to bring usage back down to the low watermark.
    pub fn bytes_to_remove(&self) -> u64 {
        if !self.above_low_watermark() {
            return 0;
        }
        let excess = self.used_percent() - self.filesystem.low_watermark;
        (excess / 100.0 * self.total_bytes() as f64).ceil() as u64
    }
}

// ---------------------------------------------------------------------------
// FilesystemMonitor
// ---------------------------------------------------------------------------

/// Shared, read-mostly view of every known filesystem.
pub struct FilesystemMonitor {
    provider: Arc<dyn StatsProvider>,
    filesystems: RwLock<BTreeMap<String, FilesystemInfo>>,
}

impl FilesystemMonitor {
    pub fn new(provider: Arc<dyn StatsProvider>) -> Self {
        Self {
            provider,
            filesystems: RwLock::new(BTreeMap::new()),
        }
    }

    /// Reload configuration from the catalog and poll statistics for each volume.
    pub fn refresh(&self, catalog: &Catalog) -> Result<()> {
        self.update(catalog.list_filesystems()?);
        Ok(())
    }

    /// Poll statistics for `filesystems` and replace the current view with them.
    pub fn update(&self, filesystems: Vec<Filesystem>) {
        let mut fresh = BTreeMap::new();
        for filesystem in filesystems {
            let info = match self.provider.poll(&filesystem) {
                Ok(stats) => FilesystemInfo::online(filesystem, stats),
                Err(e) => {
                    warn!(filesystem = %filesystem.key, error = %e, "filesystem offline");
                    FilesystemInfo {
                        filesystem,
                        availability: Availability::Offline,
                        stats: None,
                    }
                }
            };
            fresh.insert(info.filesystem.key.clone(), info);
        }
        debug!(count = fresh.len(), "filesystem monitor refreshed");
        let mut guard = self
            .filesystems
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = fresh;
    }

    /// Point-in-time copy of every filesystem, ordered by key.
    pub fn snapshot(&self) -> Vec<FilesystemInfo> {
        let guard = self
            .filesystems
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.values().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<FilesystemInfo> {
        let guard = self
            .filesystems
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// FilesystemSelector
// ---------------------------------------------------------------------------

/// Chooses a destination filesystem from the monitor's current view.
pub struct FilesystemSelector<'a> {
    monitor: &'a FilesystemMonitor,
}

impl<'a> FilesystemSelector<'a> {
    pub fn new(monitor: &'a FilesystemMonitor) -> Self {
        Self { monitor }
    }

    /// Select among every known filesystem.
    pub fn select(&self) -> Option<Filesystem> {
        select_filesystem(self.monitor.snapshot())
    }

    /// Select among the filesystems accepted by `filter`.
    pub fn select_where(&self, filter: impl Fn(&FilesystemInfo) -> bool) -> Option<Filesystem> {
        let candidates = self
            .monitor
            .snapshot()
            .into_iter()
            .filter(|info| filter(info))
            .collect();
        select_filesystem(candidates)
    }
}

/// Pick the writable filesystem with the lowest tier and, within that tier,
/// the least free space. Returns `None` when nothing is writable or the pick
/// is below [`MINIMUM_RESERVE_BYTES`].
pub fn select_filesystem(mut candidates: Vec<FilesystemInfo>) -> Option<Filesystem> {
    candidates.sort_by(|a, b| {
        a.filesystem
            .tier
            .rank()
            .cmp(&b.filesystem.tier.rank())
            .then(a.free_bytes().cmp(&b.free_bytes()))
    });

    let selected = candidates.into_iter().find(FilesystemInfo::is_writable)?;
    if selected.free_bytes() < MINIMUM_RESERVE_BYTES {
        debug!(
            filesystem = %selected.filesystem.key,
            free_bytes = selected.free_bytes(),
            "selected filesystem is below the minimum reserve"
        );
        return None;
    }
    Some(selected.filesystem)
}
