use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "strata.yaml";
pub const RULES_FILE: &str = "rules.yaml";
pub const DATABASE_FILE: &str = "strata.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve a configured path against the archive root. Absolute paths pass through.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_under_root() {
        let root = Path::new("/archive");
        assert_eq!(config_path(root), PathBuf::from("/archive/strata.yaml"));
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let root = Path::new("/archive");
        assert_eq!(
            resolve(root, Path::new("/var/lib/strata.db")),
            PathBuf::from("/var/lib/strata.db")
        );
        assert_eq!(
            resolve(root, Path::new(DATABASE_FILE)),
            PathBuf::from("/archive/strata.db")
        );
    }
}
