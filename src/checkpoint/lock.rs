//! Advisory run lock
//!
//! Only one invoice sync may run against a checkpoint at a time. The lock
//! lives in `<checkpoint>.lock` and is released when the guard returned by
//! [`RunLock::try_acquire`] is dropped, including on process exit.

use fd_lock::{RwLock, RwLockWriteGuard};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::state::CheckpointError;

/// Lock file handle
pub struct RunLock {
    lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Open (creating if needed) the lock file for `checkpoint_path`
    pub fn open(checkpoint_path: &Path) -> Result<Self, CheckpointError> {
        let path = lock_path(checkpoint_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::IoError {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::LockError(format!("Failed to open lock file: {e}")))?;

        Ok(Self {
            lock: RwLock::new(file),
            path,
        })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the exclusive lock without blocking.
    ///
    /// Fails with [`CheckpointError::Locked`] while another holder exists.
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, CheckpointError> {
        let path = self.path.clone();
        let guard = self.lock.try_write().map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                CheckpointError::Locked(path.clone())
            } else {
                CheckpointError::LockError(format!("Failed to acquire lock: {e}"))
            }
        })?;
        debug!(path = %path.display(), "Run lock acquired");
        Ok(guard)
    }
}

fn lock_path(checkpoint_path: &Path) -> PathBuf {
    let mut name = OsString::from(checkpoint_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}
