//! Platform Backup Library
//!
//! Backup and restore orchestration for a self-hosted server platform:
//! snapshots system and application state into self-describing archives
//! and reconstructs that state later, on the same or a fresh machine.

pub mod apps;
pub mod bootstrap;
pub mod config;
pub mod executor;
pub mod hooks;
pub mod manifest;
pub mod orchestrator;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
