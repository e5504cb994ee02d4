//! Durable, cross-process issue numbering.
//!
//! The counter lives in a small JSON document (`{"issue_number": N}`) next to
//! a lock file. Every successful call reads, increments and persists under
//! the lock. Numbers are never handed out twice and never rolled back, even if
//! the caller later aborts.

use crate::lock::{FileLock, LockError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{error, info, instrument, warn};

/// Maximum wait for the counter lock.
pub const ISSUE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Returned instead of an issue number when none could be allocated.
pub const ISSUE_UNAVAILABLE: i64 = -1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IssueMeta {
    issue_number: i64,
}

#[derive(Debug, Clone)]
pub struct IssueCounter {
    meta_path: PathBuf,
    lock_path: PathBuf,
    timeout: Duration,
}

impl IssueCounter {
    /// Counter persisted at `meta_path`, locked through `<meta_path>.lock`.
    pub fn new(meta_path: impl Into<PathBuf>) -> Self {
        let meta_path = meta_path.into();
        let mut lock_name = meta_path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            meta_path,
            lock_path: PathBuf::from(lock_name),
            timeout: ISSUE_LOCK_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Current persisted value; 0 when absent or unreadable.
    pub async fn current(&self) -> i64 {
        read_issue_number(&self.meta_path).await
    }

    /// Allocate the next issue number.
    ///
    /// Returns [`ISSUE_UNAVAILABLE`] (-1) when the lock cannot be taken within
    /// the timeout or the new value cannot be persisted. Callers must abort
    /// their run on -1. Nothing is written in that case.
    #[instrument(level = "info", skip_all, fields(path = %self.meta_path.display()))]
    pub async fn next_issue_number(&self) -> i64 {
        let _guard = match FileLock::acquire(&self.lock_path, self.timeout).await {
            Ok(guard) => guard,
            Err(LockError::Timeout { waited, .. }) => {
                warn!(waited_ms = waited.as_millis() as u64, "Issue counter lock busy");
                return ISSUE_UNAVAILABLE;
            }
            Err(e) => {
                error!(error = %e, "Issue counter lock failed");
                return ISSUE_UNAVAILABLE;
            }
        };

        let next = read_issue_number(&self.meta_path).await + 1;
        if let Err(e) = write_issue_number(&self.meta_path, next).await {
            error!(error = %e, next, "Failed to persist issue number");
            return ISSUE_UNAVAILABLE;
        }
        info!(issue_number = next, "Allocated issue number");
        next
    }
}

async fn read_issue_number(path: &Path) -> i64 {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(_) => return 0,
    };
    match serde_json::from_str::<IssueMeta>(&raw) {
        Ok(meta) if meta.issue_number >= 0 => meta.issue_number,
        Ok(meta) => {
            warn!(value = meta.issue_number, "Negative issue number on disk; restarting from 0");
            0
        }
        Err(e) => {
            warn!(error = %e, "Issue meta file unreadable; restarting from 0");
            0
        }
    }
}

async fn write_issue_number(path: &Path, issue_number: i64) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(&IssueMeta { issue_number })?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sequential_numbers_are_consecutive() {
        let dir = TempDir::new().unwrap();
        let counter = IssueCounter::new(dir.path().join("issue_meta.json"));

        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(counter.next_issue_number().await);
        }
        assert_eq!(got, vec![1, 2, 3, 4]);
        assert_eq!(counter.current().await, 4);
        assert!(!counter.lock_path().exists());
    }

    #[tokio::test]
    async fn test_continues_from_persisted_value() {
        let dir = TempDir::new().unwrap();
        let meta = dir.path().join("issue_meta.json");
        std::fs::write(&meta, r#"{"issue_number": 41}"#).unwrap();

        let counter = IssueCounter::new(&meta);
        assert_eq!(counter.next_issue_number().await, 42);
        assert_eq!(counter.next_issue_number().await, 43);
    }

    #[tokio::test]
    async fn test_corrupt_meta_restarts_at_one() {
        let dir = TempDir::new().unwrap();
        let meta = dir.path().join("issue_meta.json");
        std::fs::write(&meta, "issue=7").unwrap();

        let counter = IssueCounter::new(&meta);
        assert_eq!(counter.next_issue_number().await, 1);
    }

    #[tokio::test]
    async fn test_lock_timeout_returns_sentinel_without_writing() {
        let dir = TempDir::new().unwrap();
        let meta = dir.path().join("issue_meta.json");
        std::fs::write(&meta, r#"{"issue_number": 9}"#).unwrap();

        let counter = IssueCounter::new(&meta).with_timeout(Duration::from_millis(200));
        let _held = FileLock::acquire(counter.lock_path(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(counter.next_issue_number().await, ISSUE_UNAVAILABLE);
        assert_eq!(counter.current().await, 9);
    }
}
