//! Immutability primitives
//!
//! A `Locker` marks a single filesystem entry as unmodifiable. Each platform
//! has one implementation, chosen once at startup by [`platform_locker`]:
//! - Linux: the `i` attribute via `chattr` / `lsattr`
//! - macOS: the `schg` flag via `chflags` / `stat`
//! - anything else: every operation reports `Unsupported`
//!
//! When the primary tool fails (missing privilege, unsupported filesystem,
//! tool absent) the lockers degrade to permission bits: `0o444` to lock,
//! `0o644` to unlock. Degraded mode is logged but is not an error.
//!
//! `is_locked` treats a `0o444` file as locked, so a file that happens to be
//! read-only for unrelated reasons also reports as locked.

mod linux;
mod macos;

pub use linux::LinuxLocker;
pub use macos::MacLocker;

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::constants::{FALLBACK_LOCKED_MODE, FALLBACK_UNLOCKED_MODE};

/// Lock primitive errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("File locking is not supported on {0}")]
    Unsupported(&'static str),
    #[error("Path does not exist: {}", .0.display())]
    PathMissing(PathBuf),
    #[error("{primitive} failed on {} ({primitive_error}) and permission fallback failed: {source}", path.display())]
    FallbackFailed {
        primitive: &'static str,
        path: PathBuf,
        primitive_error: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to inspect {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Capability to apply, remove and query immutability on one path
pub trait Locker: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    fn lock(&self, path: &Path) -> Result<(), LockError>;

    fn unlock(&self, path: &Path) -> Result<(), LockError>;

    fn is_locked(&self, path: &Path) -> Result<bool, LockError>;
}

/// Pick the locker for the running platform
pub fn platform_locker() -> Arc<dyn Locker> {
    if cfg!(target_os = "linux") {
        Arc::new(LinuxLocker)
    } else if cfg!(target_os = "macos") {
        Arc::new(MacLocker)
    } else {
        Arc::new(UnsupportedLocker::new(std::env::consts::OS))
    }
}

/// Locker for platforms without a known primitive
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedLocker {
    os: &'static str,
}

impl UnsupportedLocker {
    pub fn new(os: &'static str) -> Self {
        Self { os }
    }
}

impl Locker for UnsupportedLocker {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn lock(&self, _path: &Path) -> Result<(), LockError> {
        Err(LockError::Unsupported(self.os))
    }

    fn unlock(&self, _path: &Path) -> Result<(), LockError> {
        Err(LockError::Unsupported(self.os))
    }

    fn is_locked(&self, _path: &Path) -> Result<bool, LockError> {
        Err(LockError::Unsupported(self.os))
    }
}

/// Follow symlinks; on failure act on the literal path
pub(crate) fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub(crate) fn ensure_exists(path: &Path) -> Result<(), LockError> {
    if fs::symlink_metadata(path).is_err() {
        return Err(LockError::PathMissing(path.to_path_buf()));
    }
    Ok(())
}

/// Run an attribute tool, folding spawn failures and non-zero exits into one message
pub(crate) fn run_tool(program: &str, args: &[&str], path: &Path) -> Result<String, String> {
    let output = Command::new(program)
        .args(args)
        .arg(path)
        .output()
        .map_err(|e| format!("{} unavailable: {}", program, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{} exited with {}: {}", program, output.status, stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn permission_bits(path: &Path) -> io::Result<u32> {
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Shape of a command-line attribute primitive
pub(crate) struct Primitive {
    pub name: &'static str,
    pub program: &'static str,
    pub set_args: &'static [&'static str],
    pub clear_args: &'static [&'static str],
}

impl Primitive {
    pub(crate) fn lock(&self, path: &Path) -> Result<(), LockError> {
        let target = resolve(path);
        ensure_exists(&target)?;

        match run_tool(self.program, self.set_args, &target) {
            Ok(_) => {
                log::info!("LOCK: {} {}", self.name, target.display());
                Ok(())
            }
            Err(primitive_error) => {
                set_mode(&target, FALLBACK_LOCKED_MODE).map_err(|source| {
                    LockError::FallbackFailed {
                        primitive: self.name,
                        path: target.clone(),
                        primitive_error: primitive_error.clone(),
                        source,
                    }
                })?;
                log::info!(
                    "LOCK (fallback): {} unavailable for {} ({}), set mode {:o}",
                    self.name,
                    target.display(),
                    primitive_error,
                    FALLBACK_LOCKED_MODE
                );
                Ok(())
            }
        }
    }

    pub(crate) fn unlock(&self, path: &Path) -> Result<(), LockError> {
        let target = resolve(path);
        ensure_exists(&target)?;

        match run_tool(self.program, self.clear_args, &target) {
            Ok(_) => {
                // A previous degraded lock may have left the fallback mode behind
                if matches!(permission_bits(&target), Ok(FALLBACK_LOCKED_MODE)) {
                    if let Err(e) = set_mode(&target, FALLBACK_UNLOCKED_MODE) {
                        log::warn!("Failed to restore write permission on {}: {}", target.display(), e);
                    }
                }
                log::info!("UNLOCK: {} {}", self.name, target.display());
                Ok(())
            }
            Err(primitive_error) => {
                set_mode(&target, FALLBACK_UNLOCKED_MODE).map_err(|source| {
                    LockError::FallbackFailed {
                        primitive: self.name,
                        path: target.clone(),
                        primitive_error: primitive_error.clone(),
                        source,
                    }
                })?;
                log::info!(
                    "UNLOCK (fallback): {} unavailable for {} ({}), set mode {:o}",
                    self.name,
                    target.display(),
                    primitive_error,
                    FALLBACK_UNLOCKED_MODE
                );
                Ok(())
            }
        }
    }

    /// `query` reports whether the primitive's marker is set; a query failure
    /// or an unset marker falls back to the permission pattern
    pub(crate) fn is_locked(
        &self,
        path: &Path,
        query: impl Fn(&Path) -> Result<bool, String>,
    ) -> Result<bool, LockError> {
        let target = resolve(path);
        ensure_exists(&target)?;

        if let Ok(true) = query(&target) {
            return Ok(true);
        }

        let mode = permission_bits(&target).map_err(|source| LockError::Inspect {
            path: target.clone(),
            source,
        })?;
        Ok(mode == FALLBACK_LOCKED_MODE)
    }
}
