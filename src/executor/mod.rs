//! Unit executor - runs one external hook or application script.
//!
//! The executor is the absorb-and-continue boundary of the engine: every
//! failure mode of a child script (missing file, spawn error, non-zero
//! exit) is converted into a `UnitOutcome::Failed` value. No error type
//! crosses this boundary, which is what lets one unit's failure never
//! abort the batch it belongs to.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Outcome of one unit of work (one hook or one application script).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    Skipped(String),
    Failed(String),
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded)
    }
}

static SCRIPT_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct UnitExecutor {
    /// Scratch directory for isolated script copies.
    script_tmp: PathBuf,
}

impl UnitExecutor {
    pub fn new(script_tmp: impl Into<PathBuf>) -> Self {
        UnitExecutor {
            script_tmp: script_tmp.into(),
        }
    }

    /// Run a script in place, blocking until it exits.
    pub fn execute(&self, script: &Path, args: &[String], work_dir: &Path) -> UnitOutcome {
        if !script.is_file() {
            return UnitOutcome::Failed(format!("script '{}' not found", script.display()));
        }

        debug!("Executing '{}' in '{}'", script.display(), work_dir.display());
        match Command::new(script).args(args).current_dir(work_dir).status() {
            Ok(status) if status.success() => UnitOutcome::Succeeded,
            Ok(status) => UnitOutcome::Failed(format!(
                "script '{}' exited with {}",
                script.display(),
                status
            )),
            Err(e) => UnitOutcome::Failed(format!(
                "unable to execute script '{}': {}",
                script.display(),
                e
            )),
        }
    }

    /// Run an application script through an isolated temporary copy.
    ///
    /// The script is copied to a private path with fixed 0555 permissions
    /// before execution, so a group-writable or attacker-modified script is
    /// never executed in place. The copy is removed unconditionally, whether
    /// the script succeeded or not.
    pub fn execute_isolated(&self, script: &Path, args: &[String], work_dir: &Path) -> UnitOutcome {
        if !script.is_file() {
            return UnitOutcome::Failed(format!("script '{}' not found", script.display()));
        }

        let tmp_script = match self.stage_script(script) {
            Ok(path) => path,
            Err(e) => {
                return UnitOutcome::Failed(format!(
                    "unable to stage script '{}': {}",
                    script.display(),
                    e
                ))
            }
        };

        let outcome = self.execute(&tmp_script, args, work_dir);

        if let Err(e) = fs::remove_file(&tmp_script) {
            warn!("Unable to remove '{}': {}", tmp_script.display(), e);
        }

        outcome
    }

    fn stage_script(&self, script: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.script_tmp)?;

        let seq = SCRIPT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_script = self
            .script_tmp
            .join(format!("unit_{}_{}", std::process::id(), seq));

        fs::copy(script, &tmp_script)?;
        fs::set_permissions(&tmp_script, fs::Permissions::from_mode(0o555))?;
        Ok(tmp_script)
    }
}
