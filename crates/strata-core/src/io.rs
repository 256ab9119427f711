//! Whole-file writes for archive configuration.

use crate::error::Result;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

fn staged(path: &Path, data: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Replace `path` with `data` in a single rename; readers see the old file or
/// the new one, never a prefix.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    staged(path, data)?.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create `path` holding `data` unless something already exists there.
///
/// Safe when several workers initialize the same archive at once: exactly one
/// of them writes. Returns true if this call created the file.
pub fn write_if_missing(path: &Path, data: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    match staged(path, data)?.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strata.yaml");
        atomic_write(&path, b"worker_id: a").unwrap();
        atomic_write(&path, b"worker_id: b").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "worker_id: b");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/rules.yaml");
        atomic_write(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn write_if_missing_keeps_existing_rules() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, b"custom").unwrap();
        assert!(!write_if_missing(&path, b"template").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "custom");
    }

    #[test]
    fn write_if_missing_creates_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.yaml");
        assert!(write_if_missing(&path, b"first").unwrap());
        assert!(!write_if_missing(&path, b"second").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
    }
}
