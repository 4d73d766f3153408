//! Mutual exclusion for scheduled tasks across processes.
//!
//! The scheduler only sees the [`TaskLock`] trait; the shipped implementation
//! is a lock file per task name. A failed acquisition is not an error, merely
//! "someone else is running this" - callers skip the run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use derive_more::{Display, Error};
use tracing::{debug, instrument, warn};

/// Lock error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("Lock error: {} at {}:{}", message, file, line)]
pub struct LockError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl LockError {
    /// Creates a new lock error with caller location tracking.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

/// Held lock. Released on drop.
#[must_use = "dropping the guard releases the lock"]
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        } else {
            debug!(path = %self.path.display(), "Lock released");
        }
    }
}

/// Non-blocking, cross-process mutual exclusion keyed by task name.
pub trait TaskLock: Send + Sync {
    /// Tries to take the lock. `Ok(None)` means another holder has it and
    /// the caller should skip its run.
    fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>, LockError>;
}

/// [`TaskLock`] backed by lock files in a directory.
///
/// A lock file older than `stale_after` is treated as the residue of a dead
/// process and taken over.
#[derive(Debug, Clone)]
pub struct FileLock {
    dir: PathBuf,
    stale_after: Duration,
}

impl FileLock {
    /// Creates a file lock rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the directory cannot be created.
    #[instrument(skip(dir), fields(dir = %dir.display()))]
    pub fn new(dir: PathBuf, stale_after: Duration) -> Result<Self, LockError> {
        fs::create_dir_all(&dir)
            .map_err(|e| LockError::new(format!("Cannot create lock dir '{}': {}", dir.display(), e)))?;
        Ok(Self { dir, stale_after })
    }

    fn is_stale(&self, path: &PathBuf) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age >= self.stale_after)
            .unwrap_or(false)
    }
}

impl TaskLock for FileLock {
    #[instrument(skip(self))]
    fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>, LockError> {
        let path = self.dir.join(format!("{}.lock", name));

        // Second pass exists only to retake a stale file we just removed.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = write!(file, "{}", std::process::id()) {
                        warn!(error = %e, "Could not write pid into lock file");
                    }
                    debug!(path = %path.display(), "Lock acquired");
                    return Ok(Some(LockGuard { path }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.is_stale(&path) {
                        warn!(path = %path.display(), "Removing stale lock file");
                        if let Err(e) = fs::remove_file(&path) {
                            return Err(LockError::new(format!(
                                "Cannot remove stale lock '{}': {}",
                                path.display(),
                                e
                            )));
                        }
                        continue;
                    }
                    debug!(path = %path.display(), "Lock held elsewhere");
                    return Ok(None);
                }
                Err(e) => {
                    return Err(LockError::new(format!(
                        "Cannot create lock '{}': {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_in_tempdir(stale_after: Duration) -> (tempfile::TempDir, FileLock) {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = FileLock::new(dir.path().to_path_buf(), stale_after).expect("lock");
        (dir, lock)
    }

    #[test]
    fn acquire_and_release() {
        let (_dir, lock) = lock_in_tempdir(Duration::from_secs(3600));

        let guard = lock.try_acquire("cleanup").expect("acquire").expect("free");
        assert!(lock.try_acquire("cleanup").expect("second try").is_none());

        drop(guard);
        assert!(lock.try_acquire("cleanup").expect("after release").is_some());
    }

    #[test]
    fn different_names_do_not_conflict() {
        let (_dir, lock) = lock_in_tempdir(Duration::from_secs(3600));

        let _a = lock.try_acquire("task_a").expect("acquire").expect("free");
        assert!(lock.try_acquire("task_b").expect("acquire").is_some());
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let (dir, lock) = lock_in_tempdir(Duration::from_millis(0));

        fs::write(dir.path().join("stuck.lock"), "99999").expect("seed lock file");
        let guard = lock.try_acquire("stuck").expect("acquire");
        assert!(guard.is_some(), "zero stale_after should take over immediately");
    }
}
