//! Installed application registry.
//!
//! Each installed application owns a settings directory holding its
//! metadata (`app.json`) and its `scripts/backup` / `scripts/restore`
//! scripts. The orchestrators only see the `AppRegistry` trait so tests
//! can inject a registry rooted in a temporary directory.

use crate::manifest::AppEntry;
use crate::utils::errors::{BackupError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub trait AppRegistry {
    /// Ids of all installed applications. Unordered set; iteration order
    /// across runs is not guaranteed.
    fn list_installed_ids(&self) -> BTreeSet<String>;

    fn is_installed(&self, id: &str) -> bool;

    /// Version, display name and description of an installed application.
    fn metadata(&self, id: &str) -> Result<AppEntry>;

    /// Live settings directory of an application (installed or not).
    fn settings_dir(&self, id: &str) -> PathBuf;
}

/// Directory-backed registry: one directory per installed app under `root`.
pub struct DirAppRegistry {
    root: PathBuf,
}

impl DirAppRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirAppRegistry { root: root.into() }
    }
}

impl AppRegistry for DirAppRegistry {
    fn list_installed_ids(&self) -> BTreeSet<String> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No installed applications: {}", e);
                return BTreeSet::new();
            }
        };

        entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect()
    }

    fn is_installed(&self, id: &str) -> bool {
        self.root.join(id).is_dir()
    }

    fn metadata(&self, id: &str) -> Result<AppEntry> {
        let path = self.root.join(id).join("app.json");
        let bytes = fs::read(&path).map_err(|_| {
            BackupError::NotFound(format!("no metadata file at '{}'", path.display()))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn settings_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_app(root: &std::path::Path, id: &str, version: &str) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("app.json"),
            serde_json::to_vec(&serde_json::json!({
                "version": version,
                "name": id.to_uppercase(),
                "description": format!("The {} app", id),
            }))
            .unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_list_and_is_installed() {
        let root = tempfile::tempdir().unwrap();
        install_app(root.path(), "blog", "1.0");
        install_app(root.path(), "wiki", "2.0");
        fs::write(root.path().join("stray_file"), b"").unwrap();

        let registry = DirAppRegistry::new(root.path());
        let ids: Vec<_> = registry.list_installed_ids().into_iter().collect();
        assert_eq!(ids, vec!["blog".to_string(), "wiki".to_string()]);
        assert!(registry.is_installed("blog"));
        assert!(!registry.is_installed("forum"));
    }

    #[test]
    fn test_metadata() {
        let root = tempfile::tempdir().unwrap();
        install_app(root.path(), "blog", "2.1.0");

        let registry = DirAppRegistry::new(root.path());
        let entry = registry.metadata("blog").unwrap();
        assert_eq!(entry.version, "2.1.0");
        assert_eq!(entry.name, "BLOG");

        assert!(matches!(
            registry.metadata("forum"),
            Err(BackupError::NotFound(_))
        ));
    }
}
