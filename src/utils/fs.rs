//! Filesystem helpers shared by the orchestrators.

use crate::utils::errors::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

/// Recursively copy a directory tree. Symlinks are not followed; they are
/// skipped with a warning since archived app settings should not reach
/// outside their own tree.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("walk failed: {}", e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under its root");
        let target = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        } else {
            tracing::warn!("Skipping non-regular file: {}", entry.path().display());
        }
    }
    Ok(())
}

/// Recursively apply fixed permissions: `dir_mode` to directories and
/// `file_mode` to regular files.
pub fn chmod_tree(root: &Path, dir_mode: u32, file_mode: u32) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("walk failed: {}", e))
        })?;
        let mode = if entry.file_type().is_dir() {
            dir_mode
        } else {
            file_mode
        };
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Create a directory (and parents) with a fixed mode.
pub fn mkdir_with_mode(path: &Path, mode: u32) -> Result<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Remove a directory tree if it exists. Returns whether anything was removed.
pub fn remove_tree_if_exists(path: &Path) -> Result<bool> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
