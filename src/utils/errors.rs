//! Custom error types for the backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("An archive named '{0}' already exists")]
    NameCollision(String),

    #[error("Forbidden output directory: {0}")]
    ForbiddenPath(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Unable to open archive for {action}: {path}")]
    ArchiveOpenFailure { action: String, path: PathBuf },

    #[error("The platform is already installed on this system")]
    AlreadyInstalled,

    #[error("Nothing was done: no hook or application produced any result")]
    NothingDone,

    #[error("Partial deletion: removed '{removed}' but '{remaining}' could not be deleted")]
    PartialFailure { removed: String, remaining: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
