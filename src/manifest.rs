//! Manifest types describing what a backup captured.
//!
//! A manifest records the creation time, the free-text description, the
//! system hooks that ran successfully and the applications whose backup
//! step fully succeeded. It is written as `info.json` inside the staging
//! tree and as the `<name>.info` companion file beside the sealed archive.

use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Backup manifest — flat JSON record, round-trips exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub description: String,
    /// Epoch seconds, set once at creation and never mutated afterwards.
    pub created_at: i64,
    pub apps: BTreeMap<String, AppEntry>,
    pub hooks: BTreeMap<String, Value>,
}

/// Metadata recorded for one successfully backed-up application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppEntry {
    pub version: String,
    pub name: String,
    pub description: String,
}

impl Manifest {
    pub fn new(description: Option<String>, created_at: i64) -> Self {
        Manifest {
            description: description.unwrap_or_default(),
            created_at,
            apps: BTreeMap::new(),
            hooks: BTreeMap::new(),
        }
    }

    /// Record the result metadata of a successfully executed system hook.
    pub fn record_hook(&mut self, name: impl Into<String>, result: Value) {
        self.hooks.insert(name.into(), result);
    }

    /// Record a successfully backed-up application.
    pub fn record_app(&mut self, id: impl Into<String>, entry: AppEntry) {
        self.apps.insert(id.into(), entry);
    }

    /// A manifest with neither hooks nor apps describes a failed backup and
    /// must never be persisted as a retrievable archive.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty() && self.apps.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BackupError::CorruptManifest(e.to_string()))
    }
}
