//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, StrataError};
use crate::filesystem::{Filesystem, StatsProvider, VolumeStats};

/// Stats provider with canned values; unknown filesystems fail to poll.
#[derive(Default)]
pub struct FixedStats {
    stats: Mutex<HashMap<String, VolumeStats>>,
}

impl FixedStats {
    pub fn with(self, key: &str, total_bytes: u64, free_bytes: u64) -> Self {
        self.set(key, total_bytes, free_bytes);
        self
    }

    pub fn set(&self, key: &str, total_bytes: u64, free_bytes: u64) {
        self.stats.lock().unwrap().insert(
            key.to_string(),
            VolumeStats {
                total_bytes,
                free_bytes,
            },
        );
    }
}

impl StatsProvider for FixedStats {
    fn poll(&self, filesystem: &Filesystem) -> Result<VolumeStats> {
        self.stats
            .lock()
            .unwrap()
            .get(&filesystem.key)
            .copied()
            .ok_or_else(|| {
                StrataError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no volume at {}", filesystem.path.display()),
                ))
            })
    }
}
