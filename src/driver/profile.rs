//! Chrome profile directory management.
//!
//! Eliminates SingletonLock conflicts via UUID-based naming plus stale lock
//! detection, so a crashed run never blocks the next one from reusing a
//! pooled profile directory.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// RAII wrapper for a Chrome profile directory.
///
/// Removes the directory on drop unless [`into_path`](Self::into_path) is
/// called, so orphaned profile directories don't accumulate under temp.
#[derive(Debug)]
pub struct BrowserProfile {
    path: PathBuf,
    cleanup_on_drop: bool,
}

impl BrowserProfile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            cleanup_on_drop: true,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume the profile and return its path, disabling auto-cleanup.
    pub fn into_path(mut self) -> PathBuf {
        self.cleanup_on_drop = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for BrowserProfile {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            info!("removing browser profile {}", self.path.display());
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("failed to clean up profile {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Create a unique profile directory under a prefix, named with a UUID v4 so
/// concurrent pages never collide on a `SingletonLock`.
pub fn create_unique_profile(prefix: &str) -> Result<BrowserProfile> {
    let path = std::env::temp_dir().join(format!("{prefix}_{}", Uuid::new_v4()));
    debug!("creating browser profile: {}", path.display());
    std::fs::create_dir(&path)
        .with_context(|| format!("failed to create profile directory: {}", path.display()))?;
    Ok(BrowserProfile::new(path))
}

/// Check whether a `SingletonLock` is stale (its owning process no longer runs).
///
/// `SingletonLock` is a symlink whose target is `{hostname}-{pid}`.
#[cfg(unix)]
#[must_use]
pub fn is_singleton_lock_stale(profile_dir: &Path) -> bool {
    let lock_path = profile_dir.join("SingletonLock");
    if !lock_path.exists() && !lock_path.is_symlink() {
        return true;
    }
    match std::fs::read_link(&lock_path) {
        Ok(target) => {
            let target_str = target.to_string_lossy();
            if let Some(pid_str) = target_str.rsplit('-').next()
                && let Ok(pid) = pid_str.parse::<i32>()
            {
                let exists = unsafe { libc::kill(pid, 0) == 0 };
                return !exists;
            }
            false
        }
        Err(_) => lock_path.is_file(),
    }
}

#[cfg(not(unix))]
#[must_use]
pub fn is_singleton_lock_stale(_profile_dir: &Path) -> bool {
    true
}

/// Sweep temp for orphaned profile directories left by a crashed process.
pub fn cleanup_stale_profiles(prefix: &str) -> Result<usize> {
    let temp_dir = std::env::temp_dir();
    let mut cleaned = 0;
    let entries = std::fs::read_dir(&temp_dir)
        .with_context(|| format!("failed to read temp directory: {}", temp_dir.display()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str())
            && name.starts_with(prefix)
            && path.is_dir()
            && is_singleton_lock_stale(&path)
        {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!("failed to remove stale profile {}: {}", path.display(), e);
            } else {
                cleaned += 1;
            }
        }
    }
    Ok(cleaned)
}
