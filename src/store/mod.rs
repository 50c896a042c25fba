//! Archive store - compressed payloads and companion manifests on disk.
//!
//! Per archive `<name>` the store root holds `<name>.tar.gz` (the payload)
//! and `<name>.info` (the manifest). The two files are written by separate
//! operations with no transactional guarantee; readers must treat a missing
//! half as `NotFound`/`CorruptManifest` rather than assume atomicity.

use crate::manifest::Manifest;
use crate::utils::errors::{BackupError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name suffix of archive payloads.
pub const PAYLOAD_SUFFIX: &str = ".tar.gz";
/// File name suffix of companion manifests.
pub const MANIFEST_SUFFIX: &str = ".info";

/// Handle to an existing, readable archive payload.
#[derive(Debug, Clone)]
pub struct ArchiveHandle {
    pub name: String,
    pub path: PathBuf,
}

pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArchiveStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn payload_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, PAYLOAD_SUFFIX))
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, MANIFEST_SUFFIX))
    }

    /// List archive names, sorted lexicographically. Entries that do not
    /// carry the payload suffix are silently skipped; a missing store root
    /// yields an empty list.
    pub fn list(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Unable to iterate over local archives: {}", e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let file_name = entry.file_name().to_string_lossy().to_string();
                file_name
                    .strip_suffix(PAYLOAD_SUFFIX)
                    .map(|name| name.to_string())
            })
            .collect();
        names.sort();
        names
    }

    /// Open an archive for reading. Fails with `NotFound` when no payload
    /// file exists for `name`.
    pub fn open(&self, name: &str) -> Result<ArchiveHandle> {
        let path = self.payload_path(name);
        if !path.is_file() {
            return Err(BackupError::NotFound(format!(
                "no local backup archive found at '{}'",
                path.display()
            )));
        }
        Ok(ArchiveHandle {
            name: name.to_string(),
            path,
        })
    }

    /// Read the companion manifest of an archive.
    pub fn read_manifest(&self, name: &str) -> Result<Manifest> {
        let path = self.manifest_path(name);
        let bytes = fs::read(&path).map_err(|_| {
            BackupError::NotFound(format!(
                "no manifest file found at '{}'",
                path.display()
            ))
        })?;
        Manifest::from_json(&bytes)
    }

    /// Compress the staging tree into `<name>.tar.gz` and write the manifest
    /// alongside it as `<name>.info`.
    ///
    /// Opening the payload follows an explicit two-step contract: attempt
    /// the write, and on failure create the store root and retry exactly
    /// once. A failure after that is `ArchiveOpenFailure`.
    pub fn seal(&self, staging_dir: &Path, name: &str, manifest: &Manifest) -> Result<PathBuf> {
        let payload = self.payload_path(name);

        let file = match File::create(&payload) {
            Ok(file) => file,
            Err(first_err) => {
                if self.root.is_dir() {
                    warn!(
                        "Unable to open archive '{}' for writing: {}",
                        payload.display(),
                        first_err
                    );
                    return Err(BackupError::ArchiveOpenFailure {
                        action: "writing".into(),
                        path: payload,
                    });
                }
                fs::create_dir_all(&self.root)?;
                fs::set_permissions(&self.root, fs::Permissions::from_mode(0o750))?;
                File::create(&payload).map_err(|retry_err| {
                    warn!(
                        "Unable to open archive '{}' for writing after creating '{}': {}",
                        payload.display(),
                        self.root.display(),
                        retry_err
                    );
                    BackupError::ArchiveOpenFailure {
                        action: "writing".into(),
                        path: payload.clone(),
                    }
                })?
            }
        };

        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("", staging_dir)?;
        builder.into_inner()?.finish()?;

        // Second, separate file operation; a crash in between leaves a
        // payload without a manifest, which readers report as NotFound.
        fs::write(self.manifest_path(name), manifest.to_json()?)?;

        info!("Archive sealed: {}", payload.display());
        Ok(payload)
    }

    /// Unpack an archive payload into `dest`.
    pub fn extract(&self, name: &str, dest: &Path) -> Result<()> {
        let handle = self.open(name)?;
        let file = File::open(&handle.path).map_err(|e| {
            warn!(
                "Unable to open archive '{}' for reading: {}",
                handle.path.display(),
                e
            );
            BackupError::ArchiveOpenFailure {
                action: "reading".into(),
                path: handle.path.clone(),
            }
        })?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .unpack(dest)
            .map_err(|e| BackupError::InvalidArchive(e.to_string()))?;
        Ok(())
    }

    /// Delete an archive: payload and manifest together. Both files must
    /// exist before anything is removed; if removing the manifest fails
    /// after the payload is gone, the error names the surviving file so the
    /// caller can finish the job manually.
    pub fn delete(&self, name: &str) -> Result<()> {
        let payload = self.payload_path(name);
        let manifest = self.manifest_path(name);

        for file in [&payload, &manifest] {
            if !file.is_file() {
                return Err(BackupError::NotFound(format!(
                    "no local backup archive found at '{}'",
                    file.display()
                )));
            }
        }

        fs::remove_file(&payload)?;
        fs::remove_file(&manifest).map_err(|e| {
            warn!("Unable to delete '{}': {}", manifest.display(), e);
            BackupError::PartialFailure {
                removed: payload.display().to_string(),
                remaining: manifest.display().to_string(),
            }
        })?;

        info!("Archive deleted: {}", name);
        Ok(())
    }

    /// Size of the archive payload in bytes.
    pub fn size(&self, name: &str) -> Result<u64> {
        let handle = self.open(name)?;
        Ok(fs::metadata(&handle.path)?.len())
    }
}

/// Format a byte count using power-of-1024 units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn staged_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("apps/blog/backup")).unwrap();
        fs::write(dir.path().join("apps/blog/backup/dump.sql"), b"data").unwrap();
        fs::write(dir.path().join("hook_output"), b"hook").unwrap();
        dir
    }

    fn seal_sample(store: &ArchiveStore, name: &str) -> Manifest {
        let staging = staged_tree();
        let mut manifest = Manifest::new(Some("test".into()), 1_700_000_000);
        manifest.record_hook("conf_ssh", serde_json::Value::Null);
        store.seal(staging.path(), name, &manifest).unwrap();
        manifest
    }

    #[test]
    fn test_list_sorted_and_skips_malformed() {
        let root = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(root.path());

        fs::write(root.path().join("b.tar.gz"), b"").unwrap();
        fs::write(root.path().join("a.tar.gz"), b"").unwrap();
        fs::write(root.path().join("a.info"), b"").unwrap();
        fs::write(root.path().join("notes.txt"), b"").unwrap();

        assert_eq!(store.list(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(root.path().join("nowhere"));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(root.path());
        assert!(matches!(
            store.open("ghost"),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn test_seal_creates_root_on_demand() {
        let base = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(base.path().join("archives"));

        let manifest = seal_sample(&store, "nightly");

        assert_eq!(store.list(), vec!["nightly".to_string()]);
        assert_eq!(store.read_manifest("nightly").unwrap(), manifest);
        assert!(store.size("nightly").unwrap() > 0);
    }

    #[test]
    fn test_seal_then_extract_round_trips_tree() {
        let base = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(base.path().join("archives"));
        seal_sample(&store, "nightly");

        let dest = tempfile::tempdir().unwrap();
        store.extract("nightly", dest.path()).unwrap();

        assert_eq!(
            fs::read(dest.path().join("apps/blog/backup/dump.sql")).unwrap(),
            b"data"
        );
        assert_eq!(fs::read(dest.path().join("hook_output")).unwrap(), b"hook");
    }

    #[test]
    fn test_read_manifest_corrupt() {
        let root = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(root.path());
        fs::write(store.manifest_path("bad"), b"{ nope").unwrap();

        assert!(matches!(
            store.read_manifest("bad"),
            Err(BackupError::CorruptManifest(_))
        ));
    }

    #[test]
    fn test_read_manifest_missing_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(root.path());
        assert!(matches!(
            store.read_manifest("ghost"),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_requires_both_files() {
        let root = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(root.path());

        // Payload without manifest: nothing may be removed.
        fs::write(store.payload_path("half"), b"payload").unwrap();
        assert!(matches!(store.delete("half"), Err(BackupError::NotFound(_))));
        assert!(store.payload_path("half").is_file());
    }

    #[test]
    fn test_delete_removes_both_files() {
        let base = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(base.path().join("archives"));
        seal_sample(&store, "nightly");

        store.delete("nightly").unwrap();
        assert!(store.list().is_empty());
        assert!(!store.manifest_path("nightly").exists());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
    }
}
