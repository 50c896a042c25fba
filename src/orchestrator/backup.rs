//! Backup creation flow.
//!
//! Stages a working directory, runs the system backup hooks and the per-app
//! backup scripts through the unit executor, assembles the manifest and
//! hands the staged tree to the archive store for sealing. Individual hook
//! and app failures are absorbed; only structural errors (validation,
//! staging, sealing) abort the operation.

use crate::apps::AppRegistry;
use crate::executor::{UnitExecutor, UnitOutcome};
use crate::hooks::{HookPhase, HookRunner};
use crate::manifest::Manifest;
use crate::store::ArchiveStore;
use crate::utils::errors::{BackupError, Result};
use crate::utils::fs::{copy_tree, mkdir_with_mode, remove_tree_if_exists};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Name of the manifest file inside the staging tree.
pub const INFO_FILE: &str = "info.json";

/// System prefixes an explicit output directory may never live under.
const FORBIDDEN_PREFIXES: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/root", "/run", "/sbin", "/sys", "/usr", "/var",
];

/// Parameters of one create operation.
#[derive(Debug, Default, Clone)]
pub struct CreateRequest {
    /// Archive name; defaults to a `%Y%m%d-%H%M%S` timestamp.
    pub name: Option<String>,
    pub description: Option<String>,
    /// Explicit output directory; mandatory with `no_compress`.
    pub output_dir: Option<PathBuf>,
    /// Deliver the staged tree as-is instead of sealing an archive.
    pub no_compress: bool,
    pub ignore_hooks: bool,
    /// Hook names to run; empty means all available.
    pub hooks: Vec<String>,
    pub ignore_apps: bool,
    /// Application ids to back up; empty means all installed.
    pub apps: Vec<String>,
}

/// Successful create result.
#[derive(Debug)]
pub struct CreateOutcome {
    pub name: String,
    pub manifest: Manifest,
}

pub struct BackupOrchestrator<'a> {
    store: &'a ArchiveStore,
    hooks: &'a dyn HookRunner,
    apps: &'a dyn AppRegistry,
    executor: &'a UnitExecutor,
    staging_root: PathBuf,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(
        store: &'a ArchiveStore,
        hooks: &'a dyn HookRunner,
        apps: &'a dyn AppRegistry,
        executor: &'a UnitExecutor,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        BackupOrchestrator {
            store,
            hooks,
            apps,
            executor,
            staging_root: staging_root.into(),
        }
    }

    /// Create a backup archive.
    pub fn create(&self, request: CreateRequest) -> Result<CreateOutcome> {
        // Validating
        if request.ignore_hooks && request.ignore_apps {
            return Err(BackupError::InvalidRequest(
                "both hooks and apps are ignored, nothing would be backed up".into(),
            ));
        }

        let created_at = chrono::Utc::now().timestamp();
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());

        if self.store.list().contains(&name) {
            return Err(BackupError::NameCollision(name));
        }

        if request.no_compress && request.output_dir.is_none() {
            return Err(BackupError::InvalidRequest(
                "an output directory is required when compression is disabled".into(),
            ));
        }

        let output_dir = match &request.output_dir {
            Some(dir) => Some(self.validate_output_dir(dir, request.no_compress)?),
            None => None,
        };

        // Staging. With no_compress the staged tree is the delivered
        // output itself and is never removed.
        let (staging, keep_staging) = match (request.no_compress, &output_dir) {
            (true, Some(dir)) => (dir.clone(), true),
            _ => {
                let staging = self.staging_root.join(&name);
                if staging.is_dir() {
                    warn!(
                        "Temporary directory for backup '{}' already exists",
                        staging.display()
                    );
                    fs::remove_dir_all(&staging)?;
                }
                mkdir_with_mode(&staging, 0o750)?;
                (staging, false)
            }
        };

        let mut manifest = Manifest::new(request.description.clone(), created_at);

        // RunningHooks
        if !request.ignore_hooks {
            self.run_backup_hooks(&request.hooks, &staging, &mut manifest);
        }

        // RunningApps
        if !request.ignore_apps {
            self.run_app_backups(&request.apps, &staging, &mut manifest);
        }

        // Check if something has been saved
        if manifest.is_empty() {
            self.clean_staging(&staging, 1, keep_staging);
            return Err(BackupError::NothingDone);
        }

        if let Err(e) = self.write_staged_manifest(&staging, &manifest) {
            self.clean_staging(&staging, 2, keep_staging);
            return Err(e);
        }

        // Sealing
        if !request.no_compress {
            info!("Creating the backup archive '{}'", name);
            if let Err(e) = self.store.seal(&staging, &name, &manifest) {
                self.clean_staging(&staging, 2, keep_staging);
                return Err(e);
            }
        }

        // CleaningUp
        self.clean_staging(&staging, 0, keep_staging);

        info!("Backup '{}' complete", name);
        Ok(CreateOutcome { name, manifest })
    }

    fn write_staged_manifest(&self, staging: &Path, manifest: &Manifest) -> Result<()> {
        fs::write(staging.join(INFO_FILE), manifest.to_json()?)?;
        Ok(())
    }

    /// Validate an explicit output directory and create it on demand.
    fn validate_output_dir(&self, dir: &Path, no_compress: bool) -> Result<PathBuf> {
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };

        let forbidden = dir == Path::new("/")
            || dir.starts_with(self.store.root())
            || FORBIDDEN_PREFIXES
                .iter()
                .any(|prefix| dir.starts_with(prefix));
        if forbidden {
            error!("Forbidden output directory '{}'", dir.display());
            return Err(BackupError::ForbiddenPath(dir));
        }

        if !dir.is_dir() {
            info!("Creating output directory '{}'", dir.display());
            mkdir_with_mode(&dir, 0o750)?;
        } else if no_compress && fs::read_dir(&dir)?.next().is_some() {
            error!("Output directory '{}' is not empty", dir.display());
            return Err(BackupError::InvalidRequest(format!(
                "output directory '{}' is not empty",
                dir.display()
            )));
        }

        Ok(dir)
    }

    fn run_backup_hooks(&self, requested: &[String], staging: &Path, manifest: &mut Manifest) {
        let available = self.hooks.list_available(HookPhase::Backup);

        let mut filtered = BTreeSet::new();
        if requested.is_empty() {
            filtered = available;
        } else {
            for hook in requested {
                if available.contains(hook) {
                    filtered.insert(hook.clone());
                } else {
                    // Recorded as a failed unit, does not abort the batch.
                    error!("Backup hook '{}' not found", hook);
                }
            }
        }

        if filtered.is_empty() {
            return;
        }

        info!("Running {} backup hook(s)", filtered.len());
        let batch = self.hooks.run_batch(
            HookPhase::Backup,
            &filtered,
            &[staging.display().to_string()],
        );
        for (hook, result) in batch.succeeded {
            manifest.record_hook(hook, result);
        }
    }

    fn run_app_backups(&self, requested: &[String], staging: &Path, manifest: &mut Manifest) {
        let installed = self.apps.list_installed_ids();

        let mut filtered = BTreeSet::new();
        if requested.is_empty() {
            filtered = installed;
        } else {
            for app in requested {
                if installed.contains(app) {
                    filtered.insert(app.clone());
                } else {
                    warn!("App '{}' not found, unable to back it up", app);
                }
            }
        }

        for app_id in filtered {
            let settings_dir = self.apps.settings_dir(&app_id);
            let backup_script = settings_dir.join("scripts/backup");
            let restore_script = settings_dir.join("scripts/restore");
            let app_dir = staging.join("apps").join(&app_id);

            let unit = if !backup_script.is_file() {
                UnitOutcome::Skipped(format!(
                    "backup script '{}' not found",
                    backup_script.display()
                ))
            } else {
                if !restore_script.is_file() {
                    // The backup still runs; the archive just won't restore
                    // this app without manual help.
                    warn!(
                        "Restore script '{}' not found for app '{}'",
                        restore_script.display(),
                        app_id
                    );
                }
                info!("Running backup script of app '{}'", app_id);
                match self.backup_one_app(&app_id, &settings_dir, &backup_script, &app_dir) {
                    Ok(entry) => {
                        manifest.record_app(app_id.clone(), entry);
                        UnitOutcome::Succeeded
                    }
                    Err(reason) => UnitOutcome::Failed(reason),
                }
            };

            match unit {
                UnitOutcome::Succeeded => {}
                UnitOutcome::Skipped(reason) => {
                    warn!("Not backing up app '{}': {}", app_id, reason);
                }
                UnitOutcome::Failed(reason) => {
                    error!("Error while backing up app '{}': {}", app_id, reason);
                    if let Err(e) = remove_tree_if_exists(&app_dir) {
                        warn!("Unable to clean '{}': {}", app_dir.display(), e);
                    }
                }
            }
        }
    }

    /// Back up one application into its isolated staging subdirectory.
    /// Any failure is reported as a string so the caller can absorb it.
    fn backup_one_app(
        &self,
        app_id: &str,
        settings_dir: &Path,
        backup_script: &Path,
        app_dir: &Path,
    ) -> std::result::Result<crate::manifest::AppEntry, String> {
        let backup_dir = app_dir.join("backup");
        mkdir_with_mode(&backup_dir, 0o750).map_err(|e| e.to_string())?;
        copy_tree(settings_dir, &app_dir.join("settings")).map_err(|e| e.to_string())?;

        let args = vec![backup_dir.display().to_string(), app_id.to_string()];
        match self.executor.execute_isolated(backup_script, &args, &backup_dir) {
            UnitOutcome::Succeeded => {}
            UnitOutcome::Skipped(reason) | UnitOutcome::Failed(reason) => return Err(reason),
        }

        self.apps
            .metadata(app_id)
            .map_err(|e| format!("unable to read app metadata: {}", e))
    }

    /// Notify the post-create hooks, then remove the staging tree unless a
    /// cleanup hook failed or the tree is the requested output itself.
    /// Cleanup problems are warnings, never part of the operation's result.
    fn clean_staging(&self, staging: &Path, retcode: i32, keep_staging: bool) {
        let available = self.hooks.list_available(HookPhase::PostBackupCreate);
        if !available.is_empty() {
            let batch = self.hooks.run_batch(
                HookPhase::PostBackupCreate,
                &available,
                &[staging.display().to_string(), retcode.to_string()],
            );
            if batch.has_failures() {
                warn!("Unable to clean the backup working directory");
                return;
            }
        }

        if keep_staging {
            return;
        }
        if let Err(e) = remove_tree_if_exists(staging) {
            warn!("Unable to remove '{}': {}", staging.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::DirAppRegistry;
    use crate::hooks::ScriptHookRunner;
    use std::os::unix::fs::PermissionsExt;

    struct TestEnv {
        _base: tempfile::TempDir,
        store: ArchiveStore,
        hooks_root: PathBuf,
        apps_root: PathBuf,
        staging_root: PathBuf,
        script_tmp: PathBuf,
    }

    impl TestEnv {
        fn new() -> Self {
            let base = tempfile::tempdir().unwrap();
            let env = TestEnv {
                store: ArchiveStore::new(base.path().join("archives")),
                hooks_root: base.path().join("hooks"),
                apps_root: base.path().join("apps"),
                staging_root: base.path().join("tmp"),
                script_tmp: base.path().join("script-tmp"),
                _base: base,
            };
            fs::create_dir_all(&env.hooks_root).unwrap();
            fs::create_dir_all(&env.apps_root).unwrap();
            env
        }

        fn install_hook(&self, phase: &str, name: &str, body: &str) {
            let dir = self.hooks_root.join(phase);
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn install_app(&self, id: &str, backup_body: Option<&str>, with_restore: bool) {
            let dir = self.apps_root.join(id);
            fs::create_dir_all(dir.join("scripts")).unwrap();
            fs::write(
                dir.join("app.json"),
                serde_json::to_vec(&serde_json::json!({
                    "version": "1.0",
                    "name": id.to_uppercase(),
                    "description": "",
                }))
                .unwrap(),
            )
            .unwrap();
            fs::write(dir.join("settings.yml"), format!("id: {}\n", id)).unwrap();
            if let Some(body) = backup_body {
                let script = dir.join("scripts/backup");
                fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
                fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            }
            if with_restore {
                let script = dir.join("scripts/restore");
                fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
                fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }

        fn create(&self, request: CreateRequest) -> Result<CreateOutcome> {
            let hooks = ScriptHookRunner::new(&self.hooks_root, UnitExecutor::new(&self.script_tmp));
            let apps = DirAppRegistry::new(&self.apps_root);
            let executor = UnitExecutor::new(&self.script_tmp);
            let orchestrator = BackupOrchestrator::new(
                &self.store,
                &hooks,
                &apps,
                &executor,
                &self.staging_root,
            );
            orchestrator.create(request)
        }
    }

    fn named(name: &str) -> CreateRequest {
        CreateRequest {
            name: Some(name.into()),
            ..CreateRequest::default()
        }
    }

    #[test]
    fn test_create_rejects_nothing_enabled() {
        let env = TestEnv::new();
        let result = env.create(CreateRequest {
            ignore_hooks: true,
            ignore_apps: true,
            ..named("x")
        });
        assert!(matches!(result, Err(BackupError::InvalidRequest(_))));
    }

    #[test]
    fn test_create_with_hook_and_app() {
        let env = TestEnv::new();
        env.install_hook("backup", "conf_ssh", r#"touch "$1/ssh_dump""#);
        env.install_app("blog", Some(r#"echo data > "$1/dump.sql""#), true);

        let outcome = env
            .create(CreateRequest {
                description: Some("nightly".into()),
                ..named("nightly")
            })
            .unwrap();

        assert_eq!(outcome.name, "nightly");
        assert!(outcome.manifest.hooks.contains_key("conf_ssh"));
        assert!(outcome.manifest.apps.contains_key("blog"));
        assert_eq!(outcome.manifest.apps["blog"].version, "1.0");

        // Archive is retrievable and carries the same manifest.
        assert_eq!(env.store.list(), vec!["nightly".to_string()]);
        let stored = env.store.read_manifest("nightly").unwrap();
        assert_eq!(stored, outcome.manifest);

        // Staging tree was cleaned up.
        assert!(!env.staging_root.join("nightly").exists());
    }

    #[test]
    fn test_create_name_collision() {
        let env = TestEnv::new();
        env.install_hook("backup", "conf_ssh", "exit 0");

        env.create(named("twice")).unwrap();
        let result = env.create(named("twice"));
        assert!(matches!(result, Err(BackupError::NameCollision(n)) if n == "twice"));
    }

    #[test]
    fn test_create_forbidden_output_dir() {
        let env = TestEnv::new();
        env.install_hook("backup", "conf_ssh", "exit 0");

        for dir in ["/etc/backups", "/usr/local/out", "/"] {
            let result = env.create(CreateRequest {
                output_dir: Some(PathBuf::from(dir)),
                ..named("out")
            });
            assert!(matches!(result, Err(BackupError::ForbiddenPath(_))), "{}", dir);
        }

        // Inside the archive store itself is forbidden too.
        let result = env.create(CreateRequest {
            output_dir: Some(env.store.root().join("sub")),
            ..named("out")
        });
        assert!(matches!(result, Err(BackupError::ForbiddenPath(_))));
    }

    #[test]
    fn test_no_compress_requires_output_dir() {
        let env = TestEnv::new();
        let result = env.create(CreateRequest {
            no_compress: true,
            ..named("raw")
        });
        assert!(matches!(result, Err(BackupError::InvalidRequest(_))));
    }

    #[test]
    fn test_no_compress_delivers_staged_tree() {
        let env = TestEnv::new();
        env.install_hook("backup", "conf_ssh", r#"touch "$1/ssh_dump""#);
        let output = env._base.path().join("delivered");

        let outcome = env
            .create(CreateRequest {
                no_compress: true,
                output_dir: Some(output.clone()),
                ..named("raw")
            })
            .unwrap();

        // No archive sealed; the output directory holds the tree.
        assert!(env.store.list().is_empty());
        assert!(output.join("ssh_dump").is_file());
        let bytes = fs::read(output.join(INFO_FILE)).unwrap();
        assert_eq!(Manifest::from_json(&bytes).unwrap(), outcome.manifest);
    }

    #[test]
    fn test_no_compress_rejects_non_empty_output_dir() {
        let env = TestEnv::new();
        env.install_hook("backup", "conf_ssh", "exit 0");
        let output = env._base.path().join("occupied");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("leftover"), b"x").unwrap();

        let result = env.create(CreateRequest {
            no_compress: true,
            output_dir: Some(output),
            ..named("raw")
        });
        assert!(matches!(result, Err(BackupError::InvalidRequest(_))));
    }

    #[test]
    fn test_app_without_backup_script_yields_nothing_done() {
        let env = TestEnv::new();
        env.install_app("blog", None, false);

        let result = env.create(CreateRequest {
            apps: vec!["blog".into()],
            ..named("nightly")
        });
        assert!(matches!(result, Err(BackupError::NothingDone)));
        assert!(env.store.list().is_empty());
    }

    #[test]
    fn test_failing_app_script_is_absorbed_and_staging_discarded() {
        let env = TestEnv::new();
        env.install_app("blog", Some("exit 1"), true);
        env.install_app("wiki", Some(r#"echo ok > "$1/dump""#), true);

        let outcome = env
            .create(CreateRequest {
                apps: vec!["blog".into(), "wiki".into()],
                ..named("nightly2")
            })
            .unwrap();

        // blog failed: absent from the manifest; wiki carried the backup.
        assert!(!outcome.manifest.apps.contains_key("blog"));
        assert!(outcome.manifest.apps.contains_key("wiki"));
    }

    #[test]
    fn test_all_units_failing_is_nothing_done() {
        let env = TestEnv::new();
        env.install_app("blog", Some("exit 1"), true);

        let result = env.create(CreateRequest {
            apps: vec!["blog".into()],
            ..named("nightly2")
        });
        assert!(matches!(result, Err(BackupError::NothingDone)));
    }

    #[test]
    fn test_unwritable_manifest_discards_staging_tree() {
        let env = TestEnv::new();
        // The hook leaves a directory squatting on the manifest's path, so
        // writing info.json fails after the units already ran.
        env.install_hook("backup", "squatter", r#"mkdir "$1/info.json""#);

        let result = env.create(named("doomed"));
        assert!(matches!(result, Err(BackupError::Io(_))));
        assert!(!env.staging_root.join("doomed").exists());
        assert!(env.store.list().is_empty());
    }

    #[test]
    fn test_unknown_requested_hook_does_not_abort() {
        let env = TestEnv::new();
        env.install_hook("backup", "conf_ssh", r#"touch "$1/ssh_dump""#);

        let outcome = env
            .create(CreateRequest {
                hooks: vec!["conf_ssh".into(), "no_such_hook".into()],
                ..named("partial")
            })
            .unwrap();

        assert!(outcome.manifest.hooks.contains_key("conf_ssh"));
        assert!(!outcome.manifest.hooks.contains_key("no_such_hook"));
    }

    #[test]
    fn test_stale_staging_directory_is_recreated() {
        let env = TestEnv::new();
        env.install_hook("backup", "conf_ssh", "exit 0");

        let stale = env.staging_root.join("nightly");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("crashed_leftover"), b"old").unwrap();

        env.create(named("nightly")).unwrap();
        // Leftover must not have been sealed into the archive.
        let dest = tempfile::tempdir().unwrap();
        env.store.extract("nightly", dest.path()).unwrap();
        assert!(!dest.path().join("crashed_leftover").exists());
    }

    #[test]
    fn test_failed_cleanup_hook_leaves_staging_in_place() {
        let env = TestEnv::new();
        env.install_hook("backup", "conf_ssh", "exit 0");
        env.install_hook("post_backup_create", "stuck", "exit 1");

        // Operation still succeeds; cleanup failure is only a warning.
        env.create(named("nightly")).unwrap();
        assert!(env.staging_root.join("nightly").is_dir());
    }
}
