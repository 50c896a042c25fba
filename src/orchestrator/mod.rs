//! Backup and restore orchestration.
//!
//! The two state machines live in `backup` and `restore`; this module
//! carries the archive inspection operations (`list`, `info`) and the
//! delete operation with its hook notifications.

pub mod backup;
pub mod restore;

pub use backup::{BackupOrchestrator, CreateOutcome, CreateRequest};
pub use restore::{RestoreOrchestrator, RestoreOutcome, RestoreRequest};

use crate::hooks::{HookPhase, HookRunner};
use crate::manifest::AppEntry;
use crate::store::{format_size, ArchiveStore};
use crate::utils::errors::Result;
use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Inspection record for one archive.
#[derive(Debug, Serialize)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub created_at: String,
    pub description: String,
    pub size: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apps: Option<BTreeMap<String, AppEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<BTreeMap<String, Value>>,
}

/// Output of the list operation.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ArchiveListing {
    Names(Vec<String>),
    /// Ordered map, so detailed listings stay lexicographic too.
    Detailed(BTreeMap<String, ArchiveInfo>),
}

/// Get info about a local backup archive.
pub fn archive_info(
    store: &ArchiveStore,
    name: &str,
    with_details: bool,
    human_readable: bool,
) -> Result<ArchiveInfo> {
    let handle = store.open(name)?;
    let manifest = store.read_manifest(name)?;

    let size = store.size(name)?;
    let size = if human_readable {
        Value::String(format_size(size))
    } else {
        Value::from(size)
    };

    let created_at = DateTime::from_timestamp(manifest.created_at, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| manifest.created_at.to_string());

    Ok(ArchiveInfo {
        path: handle.path,
        created_at,
        description: manifest.description,
        size,
        apps: with_details.then_some(manifest.apps),
        hooks: with_details.then_some(manifest.hooks),
    })
}

/// List available local backup archives, sorted lexicographically.
/// With `with_info`, archives whose manifest cannot be read are reported
/// with a warning and left out of the detailed map.
pub fn list_archives(
    store: &ArchiveStore,
    with_info: bool,
    human_readable: bool,
) -> ArchiveListing {
    let names = store.list();
    if !with_info {
        return ArchiveListing::Names(names);
    }

    let mut detailed = BTreeMap::new();
    for name in names {
        match archive_info(store, &name, false, human_readable) {
            Ok(info) => {
                detailed.insert(name, info);
            }
            Err(e) => warn!("Skipping archive '{}' from listing: {}", name, e),
        }
    }
    ArchiveListing::Detailed(detailed)
}

/// Delete a backup archive, notifying the delete hooks around the removal.
/// Notification failures are warnings, never fatal.
pub fn delete_archive(store: &ArchiveStore, hooks: &dyn HookRunner, name: &str) -> Result<()> {
    notify(hooks, HookPhase::PreBackupDelete, name);
    store.delete(name)?;
    notify(hooks, HookPhase::PostBackupDelete, name);
    Ok(())
}

fn notify(hooks: &dyn HookRunner, phase: HookPhase, name: &str) {
    let available = hooks.list_available(phase);
    if available.is_empty() {
        return;
    }
    let batch = hooks.run_batch(phase, &available, &[name.to_string()]);
    if batch.has_failures() {
        warn!(
            "{} hook(s) failed during '{}' notification",
            batch.failed.len(),
            phase.as_str()
        );
    }
}
