//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file. Every filesystem root the engine
//! touches is explicit configuration so tests can inject temporary roots.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub platform: PlatformConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Archive store root (compressed payloads and companion manifests)
    pub archives_root: PathBuf,

    /// Root for per-operation staging directories
    pub staging_root: PathBuf,

    /// Root of installed application settings (`<root>/<app_id>/...`)
    pub apps_root: PathBuf,

    /// Root of system hook scripts (`<root>/<phase>/<hook>`)
    pub hooks_root: PathBuf,

    /// Scratch directory for isolated script copies
    #[serde(default = "default_script_tmp")]
    pub script_tmp: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform state directory (`installed` marker, `current_host`)
    pub state_dir: PathBuf,

    /// Administrative user passed to the bootstrap procedure
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_script_tmp() -> PathBuf {
    std::env::temp_dir()
}

fn default_admin_user() -> String {
    "admin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a default configuration rooted under `/var/lib/platform-backup`
    pub fn default() -> Self {
        Config {
            paths: PathsConfig {
                archives_root: PathBuf::from("/var/lib/platform-backup/archives"),
                staging_root: PathBuf::from("/var/lib/platform-backup/tmp"),
                apps_root: PathBuf::from("/etc/platform/apps"),
                hooks_root: PathBuf::from("/etc/platform/hooks"),
                script_tmp: default_script_tmp(),
            },
            platform: PlatformConfig {
                state_dir: PathBuf::from("/etc/platform"),
                admin_user: default_admin_user(),
            },
            log: LogConfig {
                level: default_log_level(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml_with_defaults() {
        let toml_src = r#"
            [paths]
            archives_root = "/data/archives"
            staging_root = "/data/tmp"
            apps_root = "/data/apps"
            hooks_root = "/data/hooks"

            [platform]
            state_dir = "/data/platform"

            [log]
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.paths.archives_root, PathBuf::from("/data/archives"));
        assert_eq!(config.platform.admin_user, "admin");
        assert_eq!(config.log.level, "info");
    }
}
