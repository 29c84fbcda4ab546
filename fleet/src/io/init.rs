//! Canonical `.fleet/` layout and scaffolding.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use super::config::{FleetConfig, write_config};

/// All canonical paths within `.fleet/` for a project root.
#[derive(Debug, Clone)]
pub struct FleetPaths {
    pub root: PathBuf,
    pub fleet_dir: PathBuf,
    pub config_path: PathBuf,
    pub events_path: PathBuf,
}

impl FleetPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let fleet_dir = root.join(".fleet");
        Self {
            root: root.clone(),
            fleet_dir: fleet_dir.clone(),
            config_path: fleet_dir.join("config.toml"),
            events_path: fleet_dir.join("events.jsonl"),
        }
    }

    /// Resolve a configured path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Write the default config unless one exists (or `force` is set).
///
/// Returns `true` when a file was written.
pub fn init_fleet(root: &Path, force: bool) -> Result<bool> {
    let paths = FleetPaths::new(root);
    if paths.config_path.exists() && !force {
        debug!(path = %paths.config_path.display(), "config exists; leaving untouched");
        return Ok(false);
    }
    write_config(&paths.config_path, &FleetConfig::default())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_writes_default_config_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(init_fleet(temp.path(), false).expect("init"));
        assert!(!init_fleet(temp.path(), false).expect("second init"));
        assert!(init_fleet(temp.path(), true).expect("forced init"));

        let paths = FleetPaths::new(temp.path());
        let cfg = load_config(&paths.config_path).expect("load");
        assert_eq!(cfg, FleetConfig::default());
    }

    #[test]
    fn resolves_relative_store_paths_under_root() {
        let paths = FleetPaths::new("/work");
        assert_eq!(
            paths.resolve(Path::new(".fleet/recovery_history.json")),
            PathBuf::from("/work/.fleet/recovery_history.json")
        );
        assert_eq!(
            paths.resolve(Path::new("/abs/history.json")),
            PathBuf::from("/abs/history.json")
        );
    }
}
