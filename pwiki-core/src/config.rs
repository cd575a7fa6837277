//! Store configuration
//!
//! Both roots are passed explicitly into the engine; nothing here is global.

use crate::error::{IoContext, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the optional config file kept in the working root.
pub const CONFIG_FILE: &str = "pwiki.json";

/// Default persistent root, matching the usual container volume mount.
pub const DEFAULT_PERSISTENT_ROOT: &str = "/app/persistence";

/// Locations of the working store and its persistent mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Live tree the serving layer reads and writes.
    pub working_root: PathBuf,
    /// Durable mirror of the working tree.
    pub persistent_root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            working_root: PathBuf::from("."),
            persistent_root: PathBuf::from(DEFAULT_PERSISTENT_ROOT),
        }
    }
}

impl StoreConfig {
    pub fn new(working_root: impl Into<PathBuf>, persistent_root: impl Into<PathBuf>) -> Self {
        Self {
            working_root: working_root.into(),
            persistent_root: persistent_root.into(),
        }
    }

    /// Load `pwiki.json` from a directory, falling back to defaults when absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path).at(&path)?;
        serde_json::from_str(&data)
            .map_err(|e| StoreError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Save as `pwiki.json` in a directory (write-then-rename).
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::Config(e.to_string()))?;
        fs::write(&tmp_path, data).at(&tmp_path)?;
        fs::rename(&tmp_path, &path).at(&path)?;
        Ok(())
    }

    /// Create both roots if they do not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        for root in [&self.working_root, &self.persistent_root] {
            fs::create_dir_all(root).at(root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::load(tmp.path()).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.persistent_root, PathBuf::from("/app/persistence"));
    }

    #[test]
    fn test_save_load() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new("/srv/wiki", "/mnt/wiki");
        config.save(tmp.path()).unwrap();

        let loaded = StoreConfig::load(tmp.path()).unwrap();
        assert_eq!(loaded, config);
        assert!(!tmp.path().join("pwiki.tmp").exists());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "{ not json").unwrap();
        assert!(matches!(
            StoreConfig::load(tmp.path()),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_ensure_dirs() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path().join("work"), tmp.path().join("a/b/persist"));
        config.ensure_dirs().unwrap();
        assert!(config.working_root.is_dir());
        assert!(config.persistent_root.is_dir());
        // second call is a no-op
        config.ensure_dirs().unwrap();
    }
}
