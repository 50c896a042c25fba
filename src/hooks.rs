//! System hook discovery and batch execution.
//!
//! Hooks are named external scripts grouped by phase. The engine only
//! depends on the `HookRunner` trait; the directory-backed implementation
//! looks scripts up under `<hooks_root>/<phase>/<hook>` and executes them
//! through the unit executor, so a failing hook never aborts the batch.

use crate::executor::{UnitExecutor, UnitOutcome};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Execution phases a hook can belong to. `Backup` and `Restore` do the
/// actual work; the remaining phases are post-operation notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Backup,
    Restore,
    PostBackupCreate,
    PostBackupRestore,
    PreBackupDelete,
    PostBackupDelete,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Backup => "backup",
            HookPhase::Restore => "restore",
            HookPhase::PostBackupCreate => "post_backup_create",
            HookPhase::PostBackupRestore => "post_backup_restore",
            HookPhase::PreBackupDelete => "pre_backup_delete",
            HookPhase::PostBackupDelete => "post_backup_delete",
        }
    }
}

/// Aggregate result of running a batch of hooks.
#[derive(Debug, Default)]
pub struct HookBatch {
    /// Hook name to result metadata, for hooks that succeeded.
    pub succeeded: BTreeMap<String, Value>,
    /// Names of hooks that failed.
    pub failed: BTreeSet<String>,
}

impl HookBatch {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub trait HookRunner {
    /// Names of the hooks the system knows how to run for a phase.
    fn list_available(&self, phase: HookPhase) -> BTreeSet<String>;

    /// Run the named hooks for a phase, passing `args` to each script.
    /// Individual failures are collected, never propagated.
    fn run_batch(&self, phase: HookPhase, names: &BTreeSet<String>, args: &[String]) -> HookBatch;
}

/// Directory-backed hook runner: `<root>/<phase>/<hook>` executables.
pub struct ScriptHookRunner {
    root: PathBuf,
    executor: UnitExecutor,
}

impl ScriptHookRunner {
    pub fn new(root: impl Into<PathBuf>, executor: UnitExecutor) -> Self {
        ScriptHookRunner {
            root: root.into(),
            executor,
        }
    }

    fn script_path(&self, phase: HookPhase, name: &str) -> PathBuf {
        self.root.join(phase.as_str()).join(name)
    }
}

impl HookRunner for ScriptHookRunner {
    fn list_available(&self, phase: HookPhase) -> BTreeSet<String> {
        let phase_dir = self.root.join(phase.as_str());
        let entries = match fs::read_dir(&phase_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No hooks for phase '{}': {}", phase.as_str(), e);
                return BTreeSet::new();
            }
        };

        entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect()
    }

    fn run_batch(&self, phase: HookPhase, names: &BTreeSet<String>, args: &[String]) -> HookBatch {
        let mut batch = HookBatch::default();

        for name in names {
            let script = self.script_path(phase, name);
            match self.executor.execute(&script, args, &self.root) {
                UnitOutcome::Succeeded => {
                    debug!("Hook '{}' ({}) succeeded", name, phase.as_str());
                    batch.succeeded.insert(
                        name.clone(),
                        serde_json::json!({ "script": script.display().to_string() }),
                    );
                }
                UnitOutcome::Skipped(reason) | UnitOutcome::Failed(reason) => {
                    warn!("Hook '{}' ({}) failed: {}", name, phase.as_str(), reason);
                    batch.failed.insert(name.clone());
                }
            }
        }

        batch
    }
}
