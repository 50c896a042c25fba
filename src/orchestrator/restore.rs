//! Restore flow.
//!
//! Extracts an archive into a staging tree, bootstraps the platform when
//! restoring onto a virgin machine, then replays the system restore hooks
//! and the per-app restore scripts. As in the backup flow, per-unit
//! failures are absorbed; only structural errors abort the operation.

use crate::apps::AppRegistry;
use crate::bootstrap::{PlatformBootstrap, CURRENT_HOST_FILE};
use crate::executor::{UnitExecutor, UnitOutcome};
use crate::hooks::{HookPhase, HookRunner};
use crate::manifest::Manifest;
use crate::orchestrator::backup::INFO_FILE;
use crate::store::ArchiveStore;
use crate::utils::errors::{BackupError, Result};
use crate::utils::fs::{chmod_tree, copy_tree, remove_tree_if_exists};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Subdirectory of the staged tree holding the platform's own state,
/// including the originating domain record.
const PLATFORM_SUBDIR: &str = "platform";

/// Parameters of one restore operation.
#[derive(Debug, Default, Clone)]
pub struct RestoreRequest {
    pub name: String,
    /// Hook names to restore; empty means every hook the archive recorded.
    pub hooks: Vec<String>,
    /// Application ids to restore; empty means every archived app.
    pub apps: Vec<String>,
    pub ignore_hooks: bool,
    pub ignore_apps: bool,
    /// Proceed even though the platform is already installed.
    pub force: bool,
}

/// Successful restore result.
#[derive(Debug)]
pub struct RestoreOutcome {
    /// Ids of the applications that were restored.
    pub apps: Vec<String>,
    /// Results of the restore hooks that succeeded.
    pub hooks: BTreeMap<String, Value>,
}

pub struct RestoreOrchestrator<'a> {
    store: &'a ArchiveStore,
    hooks: &'a dyn HookRunner,
    apps: &'a dyn AppRegistry,
    executor: &'a UnitExecutor,
    bootstrap: &'a dyn PlatformBootstrap,
    staging_root: PathBuf,
    admin_user: String,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(
        store: &'a ArchiveStore,
        hooks: &'a dyn HookRunner,
        apps: &'a dyn AppRegistry,
        executor: &'a UnitExecutor,
        bootstrap: &'a dyn PlatformBootstrap,
        staging_root: impl Into<PathBuf>,
        admin_user: impl Into<String>,
    ) -> Self {
        RestoreOrchestrator {
            store,
            hooks,
            apps,
            executor,
            bootstrap,
            staging_root: staging_root.into(),
            admin_user: admin_user.into(),
        }
    }

    /// Restore from a local backup archive.
    pub fn restore(&self, request: RestoreRequest) -> Result<RestoreOutcome> {
        if request.ignore_hooks && request.ignore_apps {
            return Err(BackupError::InvalidRequest(
                "both hooks and apps are ignored, nothing would be restored".into(),
            ));
        }

        // Opening
        let handle = self.store.open(&request.name)?;

        // Extracting
        let staging = self.staging_root.join(&request.name);
        if staging.is_dir() {
            warn!(
                "Temporary directory for restoration '{}' already exists",
                staging.display()
            );
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        info!("Extracting the archive '{}'", handle.path.display());
        if let Err(e) = self.store.extract(&request.name, &staging) {
            self.clean_staging(&staging, 1);
            return Err(e);
        }

        // The manifest is read back from the extracted tree, not from the
        // store's companion file.
        let manifest = self.read_staged_manifest(&staging).map_err(|e| {
            self.clean_staging(&staging, 1);
            e
        })?;
        info!(
            "Restoring from backup '{}' created at {}",
            request.name, manifest.created_at
        );

        // Bootstrapping
        if let Err(e) = self.ensure_platform(&staging, request.force) {
            self.clean_staging(&staging, 1);
            return Err(e);
        }

        let mut outcome = RestoreOutcome {
            apps: Vec::new(),
            hooks: BTreeMap::new(),
        };

        // RunningHooks
        if !request.ignore_hooks {
            self.run_restore_hooks(&request, &manifest, &staging, &mut outcome);
        }

        // RunningApps
        if !request.ignore_apps {
            self.run_app_restores(&request, &manifest, &staging, &mut outcome);
        }

        // Check if something has been restored
        if outcome.apps.is_empty() && outcome.hooks.is_empty() {
            self.clean_staging(&staging, 1);
            return Err(BackupError::NothingDone);
        }

        // CleaningUp
        self.clean_staging(&staging, 0);

        info!("Restoration of '{}' complete", request.name);
        Ok(outcome)
    }

    fn read_staged_manifest(&self, staging: &Path) -> Result<Manifest> {
        let info_path = staging.join(INFO_FILE);
        let bytes = fs::read(&info_path).map_err(|_| {
            error!(
                "Unable to retrieve backup info from '{}'",
                info_path.display()
            );
            BackupError::InvalidArchive(format!("missing '{}'", INFO_FILE))
        })?;
        Manifest::from_json(&bytes)
            .map_err(|e| BackupError::InvalidArchive(format!("unparsable '{}': {}", INFO_FILE, e)))
    }

    /// Bootstrap the platform from the archive when it has never been
    /// initialized here; otherwise require the force flag.
    fn ensure_platform(&self, staging: &Path, force: bool) -> Result<()> {
        if self.bootstrap.is_installed() {
            warn!("The platform is already installed on this system");
            if !force {
                return Err(BackupError::AlreadyInstalled);
            }
            return Ok(());
        }

        let host_file = staging.join(PLATFORM_SUBDIR).join(CURRENT_HOST_FILE);
        let domain = fs::read_to_string(&host_file)
            .ok()
            .and_then(|content| content.lines().next().map(|line| line.trim().to_string()))
            .filter(|domain| !domain.is_empty())
            .ok_or_else(|| {
                error!(
                    "Unable to retrieve the domain from '{}'",
                    host_file.display()
                );
                BackupError::InvalidArchive(format!("missing '{}'", host_file.display()))
            })?;

        // Trust boundary: the archive decides which identity this machine
        // adopts. Nothing in the archive authenticates the domain.
        warn!(
            "Adopting domain '{}' as recorded in the archive; verify it is the expected one",
            domain
        );

        info!("Executing the platform bootstrap...");
        self.bootstrap.bootstrap(&domain, &self.admin_user, true)
    }

    fn run_restore_hooks(
        &self,
        request: &RestoreRequest,
        manifest: &Manifest,
        staging: &Path,
        outcome: &mut RestoreOutcome,
    ) {
        let archived: BTreeSet<String> = manifest.hooks.keys().cloned().collect();
        let requested: Vec<String> = if request.hooks.is_empty() {
            archived.iter().cloned().collect()
        } else {
            request.hooks.clone()
        };

        let available = self.hooks.list_available(HookPhase::Restore);
        let mut filtered = BTreeSet::new();
        for hook in requested {
            if !archived.contains(&hook) {
                error!(
                    "Hook '{}' was not executed in the backup '{}'",
                    hook, request.name
                );
                continue;
            }
            if !available.contains(&hook) {
                error!("Restoration hook '{}' not found", hook);
                continue;
            }
            filtered.insert(hook);
        }

        if filtered.is_empty() {
            return;
        }

        info!("Running {} restoration hook(s)", filtered.len());
        let batch = self.hooks.run_batch(
            HookPhase::Restore,
            &filtered,
            &[staging.display().to_string()],
        );
        outcome.hooks.extend(batch.succeeded);
    }

    fn run_app_restores(
        &self,
        request: &RestoreRequest,
        manifest: &Manifest,
        staging: &Path,
        outcome: &mut RestoreOutcome,
    ) {
        let archived: BTreeSet<String> = manifest.apps.keys().cloned().collect();

        let mut filtered = BTreeSet::new();
        if request.apps.is_empty() {
            filtered = archived;
        } else {
            for app in &request.apps {
                if archived.contains(app) {
                    filtered.insert(app.clone());
                } else {
                    error!(
                        "App '{}' not found in the backup '{}'",
                        app, request.name
                    );
                }
            }
        }

        for app_id in filtered {
            let app_staging = staging.join("apps").join(&app_id);
            let restore_script = app_staging.join("settings/scripts/restore");
            let settings_dest = self.apps.settings_dir(&app_id);

            let unit = if self.apps.is_installed(&app_id) {
                UnitOutcome::Skipped("already installed".into())
            } else if !restore_script.is_file() {
                UnitOutcome::Skipped(format!(
                    "no restore script in the backup '{}'",
                    request.name
                ))
            } else {
                info!("Running restore script of app '{}'", app_id);
                match self.restore_one_app(&app_id, &app_staging, &restore_script, &settings_dest)
                {
                    Ok(()) => UnitOutcome::Succeeded,
                    Err(reason) => UnitOutcome::Failed(reason),
                }
            };

            match unit {
                UnitOutcome::Succeeded => outcome.apps.push(app_id),
                UnitOutcome::Skipped(reason) => {
                    warn!("Not restoring app '{}': {}", app_id, reason);
                }
                UnitOutcome::Failed(reason) => {
                    error!("Error while restoring app '{}': {}", app_id, reason);
                    // Remove the copied settings so the app is not left
                    // half-installed. The tree was locked read-only, so
                    // reopen it for writing first.
                    let _ = chmod_tree(&settings_dest, 0o755, 0o644);
                    if let Err(e) = remove_tree_if_exists(&settings_dest) {
                        warn!("Unable to clean '{}': {}", settings_dest.display(), e);
                    }
                }
            }
        }
    }

    /// Restore one application. Any failure is reported as a string so the
    /// caller can absorb it.
    fn restore_one_app(
        &self,
        app_id: &str,
        app_staging: &Path,
        restore_script: &Path,
        settings_dest: &Path,
    ) -> std::result::Result<(), String> {
        copy_tree(&app_staging.join("settings"), settings_dest).map_err(|e| e.to_string())?;
        chmod_tree(settings_dest, 0o555, 0o444).map_err(|e| e.to_string())?;
        let settings_file = settings_dest.join("settings.yml");
        if settings_file.is_file() {
            fs::set_permissions(&settings_file, fs::Permissions::from_mode(0o400))
                .map_err(|e| e.to_string())?;
        }

        let backup_dir = app_staging.join("backup");
        let args = vec![backup_dir.display().to_string(), app_id.to_string()];
        match self
            .executor
            .execute_isolated(restore_script, &args, &backup_dir)
        {
            UnitOutcome::Succeeded => Ok(()),
            UnitOutcome::Skipped(reason) | UnitOutcome::Failed(reason) => Err(reason),
        }
    }

    /// Notify the post-restore hooks, then remove the staging tree unless a
    /// cleanup hook failed. Advisory only.
    fn clean_staging(&self, staging: &Path, retcode: i32) {
        let available = self.hooks.list_available(HookPhase::PostBackupRestore);
        if !available.is_empty() {
            let batch = self.hooks.run_batch(
                HookPhase::PostBackupRestore,
                &available,
                &[staging.display().to_string(), retcode.to_string()],
            );
            if batch.has_failures() {
                warn!("Unable to clean the restore working directory");
                return;
            }
        }

        if let Err(e) = remove_tree_if_exists(staging) {
            warn!("Unable to remove '{}': {}", staging.display(), e);
        }
    }
}
