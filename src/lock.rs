//! Cross-process mutual exclusion through lock files.
//!
//! A lock is held while its file exists. Acquisition creates the file with
//! `create_new`, which the OS performs atomically, so two processes can never
//! both succeed. Waiters poll until their timeout elapses. The guard removes
//! the file on drop.
//!
//! A holder that crashes leaves its file behind. Files older than the stale
//! threshold are treated as abandoned and removed by the next waiter, but
//! only after confirming the file was not replaced in the meantime.

use std::fs::{self as stdfs, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Interval between acquisition attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Age after which an existing lock file is considered abandoned.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {path}")]
    Timeout { path: PathBuf, waited: Duration },
    #[error("lock file {path} could not be created: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Guard for an acquired lock file.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting at most `timeout`.
    pub async fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire_with(path, timeout, STALE_LOCK_AGE).await
    }

    /// Like [`FileLock::acquire`] with an explicit stale threshold.
    pub async fn acquire_with(
        path: impl Into<PathBuf>,
        timeout: Duration,
        stale_after: Duration,
    ) -> Result<Self, LockError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            stdfs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;
        }

        let started = Instant::now();
        loop {
            match try_create(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), waited_ms = started.elapsed().as_millis() as u64, "Lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(holder) = stale_holder(&path, stale_after) {
                        if break_stale(&path, &holder) {
                            warn!(path = %path.display(), "Broke stale lock file");
                            continue;
                        }
                    }
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Timeout { path, waited });
                    }
                    sleep(POLL_INTERVAL.min(timeout - waited)).await;
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = stdfs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock file");
        }
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    // holder info is diagnostic only
    let _ = writeln!(
        file,
        "{}\n{}",
        std::process::id(),
        chrono::Local::now().to_rfc3339()
    );
    Ok(())
}

/// Contents of the lock file at `path` if it is older than `stale_after`.
fn stale_holder(path: &Path, stale_after: Duration) -> Option<String> {
    let stale = stdfs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= stale_after);
    if !stale {
        return None;
    }
    stdfs::read_to_string(path).ok()
}

/// Remove the lock file at `path` only if it still holds `observed`.
///
/// The file is first renamed to a private name, so a concurrent waiter that
/// already replaced the stale lock with its own live one never has that
/// live lock deleted: the renamed file is checked and, if it is not the one
/// observed, linked back into place. Returns whether a stale lock was removed.
fn break_stale(path: &Path, observed: &str) -> bool {
    let mut grave_name = path.as_os_str().to_owned();
    grave_name.push(format!(".stale-{}-{:08x}", std::process::id(), rand::random::<u32>()));
    let grave = PathBuf::from(grave_name);

    if let Err(e) = stdfs::rename(path, &grave) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not move stale lock aside");
        }
        return false;
    }

    let taken = stdfs::read_to_string(&grave).unwrap_or_default();
    if taken == observed {
        let _ = stdfs::remove_file(&grave);
        return true;
    }

    // someone else's live lock: restore it unless yet another holder exists
    match stdfs::hard_link(&grave, path) {
        Ok(()) => debug!(path = %path.display(), "Restored live lock moved during stale check"),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not restore live lock"),
    }
    let _ = stdfs::remove_file(&grave);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks/gen.lock");

        let guard = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        assert!(path.exists());
        assert_eq!(guard.path(), path.as_path());
        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.lock");

        let _held = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        let second = FileLock::acquire(&path, Duration::from_millis(250)).await;
        match second {
            Err(LockError::Timeout { waited, .. }) => {
                assert!(waited >= Duration::from_millis(250))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // the holder's file must survive a waiter timing out
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.lock");

        let held = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        let waiter = FileLock::acquire(&path, Duration::from_secs(2));
        let release = async {
            sleep(Duration::from_millis(200)).await;
            drop(held);
        };
        let (acquired, ()) = tokio::join!(waiter, release);
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.lock");
        stdfs::write(&path, "12345\n").unwrap();

        let guard = FileLock::acquire_with(&path, Duration::from_millis(50), Duration::ZERO)
            .await
            .unwrap();
        let holder = stdfs::read_to_string(guard.path()).unwrap();
        assert!(holder.starts_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_break_stale_keeps_replaced_live_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.lock");
        // a waiter saw "old holder" as stale, but another waiter has since
        // replaced it with a live lock
        stdfs::write(&path, "999\nlive\n").unwrap();

        assert!(!break_stale(&path, "12345\nold holder\n"));
        assert_eq!(stdfs::read_to_string(&path).unwrap(), "999\nlive\n");
        let leftovers = stdfs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_break_stale_removes_unchanged_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.lock");
        stdfs::write(&path, "12345\nold holder\n").unwrap();

        assert!(break_stale(&path, "12345\nold holder\n"));
        assert!(!path.exists());
        assert_eq!(stdfs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
