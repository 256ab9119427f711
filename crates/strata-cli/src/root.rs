use std::path::{Path, PathBuf};

use strata_core::paths;

/// Resolve the archive root.
///
/// `--root` / `STRATA_ROOT` wins; otherwise the nearest ancestor of the current
/// directory holding a `strata.yaml`; otherwise the current directory.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_config_dir(&cwd).unwrap_or(cwd)
}

fn find_config_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| paths::config_path(dir).is_file())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_root(Some(dir.path())), dir.path());
    }

    #[test]
    fn finds_nearest_config_upward() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::config_path(dir.path()), "version: 1\n").unwrap();
        let deep = dir.path().join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(find_config_dir(&deep).as_deref(), Some(dir.path()));
    }

    #[test]
    fn no_config_means_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_config_dir(dir.path()), None);
    }
}
