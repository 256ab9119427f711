//! Volume statistics from the operating system.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

use strata_core::filesystem::{Filesystem, StatsProvider, VolumeStats};
use strata_core::{Result, StrataError};

/// Polls `statvfs(3)` on each filesystem's mount path.
pub struct DiskStatsProvider;

impl StatsProvider for DiskStatsProvider {
    fn poll(&self, filesystem: &Filesystem) -> Result<VolumeStats> {
        let path = CString::new(filesystem.path.as_os_str().as_bytes()).map_err(|_| {
            StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "filesystem path contains a NUL byte",
            ))
        })?;
        let mut raw: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(path.as_ptr(), &mut raw) };
        if rc != 0 {
            return Err(StrataError::Io(std::io::Error::last_os_error()));
        }
        let fragment = raw.f_frsize as u64;
        Ok(VolumeStats {
            total_bytes: (raw.f_blocks as u64).saturating_mul(fragment),
            free_bytes: (raw.f_bavail as u64).saturating_mul(fragment),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::types::FilesystemTier;
    use tempfile::TempDir;

    #[test]
    fn polls_an_existing_directory() {
        let dir = TempDir::new().unwrap();
        let fs = Filesystem::new("tmp", dir.path(), FilesystemTier::Tier1);
        let stats = DiskStatsProvider.poll(&fs).unwrap();
        assert!(stats.total_bytes > 0);
        assert!(stats.free_bytes <= stats.total_bytes);
    }

    #[test]
    fn missing_path_is_an_error() {
        let fs = Filesystem::new("gone", "/definitely/not/here", FilesystemTier::Tier1);
        assert!(DiskStatsProvider.poll(&fs).is_err());
    }
}
