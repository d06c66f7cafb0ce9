//! Cross-process lock guarding every git operation on the working tree.
//!
//! Two layers:
//!
//! - an in-process FIFO queue (`tokio::sync::Mutex` hands out its permits in
//!   request order), so transactions of one process run in the order they
//!   asked for the lock;
//! - an exclusive `flock` on the lock file, polled until the deadline, which
//!   excludes every other process (and every other `RepoLock` instance)
//!   using the same path.
//!
//! The guard releases both on drop, on every exit path of the critical
//! section.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use spdlog::{debug, warn};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::error::{Result, StoreError};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_LOCK_FILE_NAME: &str = "blog-git.lock";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RepoLock {
    path: PathBuf,
    queue: Arc<Mutex<()>>,
}

impl RepoLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RepoLock {
            path: path.into(),
            queue: Arc::new(Mutex::new(())),
        }
    }

    /// `<tmp>/blog-git.lock`, shared by every process of the machine.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(DEFAULT_LOCK_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits until the lock is held or `timeout` elapses.
    pub async fn acquire(&self, timeout: Duration) -> Result<RepoLockGuard> {
        let started = Instant::now();
        let deadline = started + timeout;

        let turn = match tokio::time::timeout_at(deadline, self.queue.clone().lock_owned()).await {
            Ok(turn) => turn,
            Err(_) => return Err(self.timed_out(started)),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        loop {
            if let Some(file) = self.try_lock_file()? {
                debug!("Lock acquired: {} (waited {}ms)", self.path.display(), started.elapsed().as_millis());
                return Ok(RepoLockGuard {
                    path: self.path.clone(),
                    file: Some(file),
                    _turn: Some(turn),
                });
            }

            if Instant::now() >= deadline {
                // `turn` is dropped here, the next waiter of this process moves on
                return Err(self.timed_out(started));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL.min(deadline - Instant::now())).await;
        }
    }

    fn try_lock_file(&self) -> Result<Option<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn timed_out(&self, started: Instant) -> StoreError {
        warn!("Lock acquisition timeout: {}", self.path.display());
        StoreError::LockTimeout {
            path: self.path.clone(),
            waited: started.elapsed(),
        }
    }
}

/// Proof that the repository lock is held.
#[derive(Debug)]
pub struct RepoLockGuard {
    path: PathBuf,
    file: Option<File>,
    _turn: Option<OwnedMutexGuard<()>>,
}

impl RepoLockGuard {
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock. Calling it again is a no-op.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                // Closing the descriptor below drops the flock anyway
                warn!("Lock release error on {}: {}", self.path.display(), e);
            }
            debug!("Lock released: {}", self.path.display());
        }
        self._turn.take();
    }
}

impl Drop for RepoLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}
