//! Utility modules for the backup engine.

pub mod errors;
pub mod fs;
pub mod logger;

pub use errors::{BackupError, Result};
