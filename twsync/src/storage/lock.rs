//! Exclusive lock on the sync state
//!
//! A pass holds an OS advisory lock on `<state file>.lock` from Load to
//! Persist. The lock is released when the guard drops, including when the
//! process dies, so a crashed pass never leaves a stale lock behind.

use crate::config::LOCK_POLL_INTERVAL_MS;
use crate::error::{AppError, Result};
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Guard for the exclusive state lock
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Lock file path for a given state file
    pub fn lock_path_for(state_path: &Path) -> PathBuf {
        let mut name = state_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire the lock, polling for at most `wait`.
    ///
    /// Fails with the retryable `AppError::LockContention` when the wait
    /// runs out.
    pub async fn acquire(state_path: &Path, wait: Duration) -> Result<StateLock> {
        let path = Self::lock_path_for(state_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => {
                    tracing::debug!("Acquired sync lock {:?}", path);
                    return Ok(StateLock { file, path });
                }
                Err(TryLockError::WouldBlock) => {
                    let waited = started.elapsed();
                    if waited >= wait {
                        tracing::warn!("Sync lock {:?} still held after {:?}", path, waited);
                        return Err(AppError::LockContention { path, waited });
                    }
                    tokio::time::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS)).await;
                }
                Err(TryLockError::Error(e)) => return Err(AppError::Io(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release sync lock {:?}: {}", self.path, e);
        } else {
            tracing::debug!("Released sync lock {:?}", self.path);
        }
    }
}
