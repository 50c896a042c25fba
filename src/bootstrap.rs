//! One-time platform bootstrap, invoked when restoring onto a machine the
//! platform has never been initialized on.

use crate::utils::errors::Result;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Name of the marker file whose presence means "platform initialized".
pub const INSTALLED_MARKER: &str = "installed";
/// Name of the file recording the platform's primary domain.
pub const CURRENT_HOST_FILE: &str = "current_host";

pub trait PlatformBootstrap {
    /// Whether the platform has already been initialized on this system.
    fn is_installed(&self) -> bool;

    /// Initialize the platform for `domain`. `restoring` marks the call as
    /// part of a restore, so the procedure skips anything the archive is
    /// about to bring back anyway.
    fn bootstrap(&self, domain: &str, admin_user: &str, restoring: bool) -> Result<()>;
}

/// Marker-file bootstrap: the platform state directory holds an `installed`
/// marker and the `current_host` domain record.
pub struct MarkerBootstrap {
    state_dir: PathBuf,
}

impl MarkerBootstrap {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        MarkerBootstrap {
            state_dir: state_dir.into(),
        }
    }
}

impl PlatformBootstrap for MarkerBootstrap {
    fn is_installed(&self) -> bool {
        self.state_dir.join(INSTALLED_MARKER).is_file()
    }

    fn bootstrap(&self, domain: &str, admin_user: &str, restoring: bool) -> Result<()> {
        info!(
            "Bootstrapping platform for domain '{}' (admin: {}, restoring: {})",
            domain, admin_user, restoring
        );

        fs::create_dir_all(&self.state_dir)?;
        fs::write(self.state_dir.join(CURRENT_HOST_FILE), format!("{}\n", domain))?;
        fs::write(self.state_dir.join(INSTALLED_MARKER), b"")?;
        Ok(())
    }
}
