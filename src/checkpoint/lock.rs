//! Advisory lock over the checkpoint directory
//!
//! Uses fd-lock so that two processes sharing a checkpoint directory serialize
//! their record creation and replacement. The guard lives for exactly the
//! duration of the closure passed to [`StoreLock::exclusive`] or
//! [`StoreLock::shared`].

use super::CheckpointError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the lock file inside the checkpoint directory
pub const LOCK_FILE_NAME: &str = ".store.lock";

/// Directory-wide advisory lock
pub struct StoreLock {
    path: PathBuf,
    lock: RwLock<File>,
}

impl StoreLock {
    /// Open (creating if needed) the lock file in `dir`
    pub fn open(dir: &Path) -> Result<Self, CheckpointError> {
        std::fs::create_dir_all(dir).map_err(|e| CheckpointError::IoError(e.to_string()))?;

        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::LockError(format!("Failed to open lock file: {e}")))?;

        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` while holding the exclusive lock. Blocks until it is available.
    pub fn exclusive<T>(
        &mut self,
        f: impl FnOnce() -> Result<T, CheckpointError>,
    ) -> Result<T, CheckpointError> {
        debug!(lock = %self.path.display(), "Acquiring exclusive checkpoint lock");
        let _guard = self
            .lock
            .write()
            .map_err(|e| CheckpointError::LockError(format!("Failed to acquire write lock: {e}")))?;
        f()
    }

    /// Run `f` while holding a shared lock
    pub fn shared<T>(
        &self,
        f: impl FnOnce() -> Result<T, CheckpointError>,
    ) -> Result<T, CheckpointError> {
        debug!(lock = %self.path.display(), "Acquiring shared checkpoint lock");
        let _guard = self
            .lock
            .read()
            .map_err(|e| CheckpointError::LockError(format!("Failed to acquire read lock: {e}")))?;
        f()
    }
}
