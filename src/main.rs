//! Platform Backup - Main entry point
//!
//! Command-line front end for the backup/restore orchestration engine.

use anyhow::Result;
use clap::{Parser, Subcommand};
use platform_backup::apps::DirAppRegistry;
use platform_backup::bootstrap::MarkerBootstrap;
use platform_backup::config::Config;
use platform_backup::executor::UnitExecutor;
use platform_backup::hooks::ScriptHookRunner;
use platform_backup::orchestrator::{
    archive_info, delete_archive, list_archives, BackupOrchestrator, CreateRequest,
    RestoreOrchestrator, RestoreRequest,
};
use platform_backup::store::ArchiveStore;
use platform_backup::utils;
use platform_backup::BackupError;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a backup archive
    Create {
        /// Archive name (defaults to a timestamp)
        name: Option<String>,

        /// Short description of the backup
        #[arg(short, long)]
        description: Option<String>,

        /// Output directory for the backup
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Deliver the staged tree instead of a compressed archive
        #[arg(long)]
        no_compress: bool,

        /// Do not execute backup hooks
        #[arg(long)]
        ignore_hooks: bool,

        /// Backup hook to execute (repeatable; default: all)
        #[arg(long = "hook")]
        hooks: Vec<String>,

        /// Do not back up apps
        #[arg(long)]
        ignore_apps: bool,

        /// Application to back up (repeatable; default: all installed)
        #[arg(long = "app")]
        apps: Vec<String>,
    },

    /// Restore from a backup archive
    Restore {
        /// Name of the local backup archive
        name: String,

        /// Restoration hook to execute (repeatable; default: all archived)
        #[arg(long = "hook")]
        hooks: Vec<String>,

        /// Application to restore (repeatable; default: all archived)
        #[arg(long = "app")]
        apps: Vec<String>,

        /// Do not execute restoration hooks
        #[arg(long)]
        ignore_hooks: bool,

        /// Do not restore apps
        #[arg(long)]
        ignore_apps: bool,

        /// Restore even though the platform is already installed
        #[arg(short, long)]
        force: bool,
    },

    /// List available backup archives
    List {
        /// Show backup information for each archive
        #[arg(long)]
        with_info: bool,

        /// Print sizes in human readable format
        #[arg(short = 'H', long)]
        human_readable: bool,
    },

    /// Get info about a backup archive
    Info {
        /// Name of the local backup archive
        name: String,

        /// Show the archived apps and hooks
        #[arg(long)]
        with_details: bool,

        /// Print sizes in human readable format
        #[arg(short = 'H', long)]
        human_readable: bool,
    },

    /// Delete a backup archive
    Delete {
        /// Name of the local backup archive
        name: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let store = ArchiveStore::new(&config.paths.archives_root);
    let executor = UnitExecutor::new(&config.paths.script_tmp);
    let hooks = ScriptHookRunner::new(
        &config.paths.hooks_root,
        UnitExecutor::new(&config.paths.script_tmp),
    );
    let apps = DirAppRegistry::new(&config.paths.apps_root);
    let bootstrap = MarkerBootstrap::new(&config.platform.state_dir);

    match args.command {
        Command::Create {
            name,
            description,
            output_dir,
            no_compress,
            ignore_hooks,
            hooks: hook_names,
            ignore_apps,
            apps: app_ids,
        } => {
            let orchestrator = BackupOrchestrator::new(
                &store,
                &hooks,
                &apps,
                &executor,
                &config.paths.staging_root,
            );
            let outcome = orchestrator.create(CreateRequest {
                name,
                description,
                output_dir,
                no_compress,
                ignore_hooks,
                hooks: hook_names,
                ignore_apps,
                apps: app_ids,
            })?;
            println!(
                "Backup '{}' created ({} hook(s), {} app(s))",
                outcome.name,
                outcome.manifest.hooks.len(),
                outcome.manifest.apps.len()
            );
        }

        Command::Restore {
            name,
            hooks: hook_names,
            apps: app_ids,
            ignore_hooks,
            ignore_apps,
            force,
        } => {
            let orchestrator = RestoreOrchestrator::new(
                &store,
                &hooks,
                &apps,
                &executor,
                &bootstrap,
                &config.paths.staging_root,
                &config.platform.admin_user,
            );
            let request = RestoreRequest {
                name,
                hooks: hook_names,
                apps: app_ids,
                ignore_hooks,
                ignore_apps,
                force,
            };
            let outcome = match orchestrator.restore(request.clone()) {
                Err(BackupError::AlreadyInstalled) if !force => {
                    if confirm_reinstall()? {
                        orchestrator.restore(RestoreRequest {
                            force: true,
                            ..request
                        })?
                    } else {
                        return Err(BackupError::AlreadyInstalled.into());
                    }
                }
                other => other?,
            };
            println!(
                "Restoration complete ({} hook(s), {} app(s): {})",
                outcome.hooks.len(),
                outcome.apps.len(),
                outcome.apps.join(", ")
            );
        }

        Command::List {
            with_info,
            human_readable,
        } => {
            let listing = list_archives(&store, with_info, human_readable);
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }

        Command::Info {
            name,
            with_details,
            human_readable,
        } => {
            let info = archive_info(&store, &name, with_details, human_readable)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Command::Delete { name } => {
            delete_archive(&store, &hooks, &name)?;
            println!("Backup '{}' deleted", name);
        }
    }

    Ok(())
}

/// Ask the user whether to restore over an already-installed platform.
fn confirm_reinstall() -> Result<bool> {
    print!("The platform is already installed; restore over it anyway? [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y"))
}
