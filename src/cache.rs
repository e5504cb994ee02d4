//! Per-source article cache snapshots.
//!
//! Each source owns one `articles.json` in its cache directory. A snapshot
//! younger than [`FRESHNESS_WINDOW`] is served without touching the network;
//! an older one is replaced wholesale by the next fetch. Missing and corrupt
//! snapshots are both cache misses.

use crate::models::{Article, CacheSnapshot, Source};
use chrono::{DateTime, Local, TimeDelta};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, instrument, warn};

/// How long a snapshot (or rendered artifact) stays valid.
pub const FRESHNESS_WINDOW: TimeDelta = TimeDelta::hours(3);

/// File name of the snapshot inside a source cache directory.
pub const SNAPSHOT_FILE: &str = "articles.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache snapshot {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn snapshot_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(SNAPSHOT_FILE)
}

/// Read a snapshot, distinguishing "absent" (`Ok(None)`) from I/O and
/// parse failures.
pub async fn read_snapshot(cache_dir: &Path) -> Result<Option<CacheSnapshot>, CacheError> {
    let path = snapshot_path(cache_dir);
    let raw = match fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CacheError::Io { path, source }),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| CacheError::Parse { path, source })
}

/// Read a snapshot, folding every failure into a cache miss.
pub async fn load_snapshot(cache_dir: &Path) -> Option<CacheSnapshot> {
    match read_snapshot(cache_dir).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable cache snapshot");
            None
        }
    }
}

/// A snapshot is fresh while `now - timestamp` is under the window.
pub fn is_fresh(snapshot: &CacheSnapshot, now: DateTime<Local>) -> bool {
    now.signed_duration_since(snapshot.timestamp) < FRESHNESS_WINDOW
}

/// Replace the snapshot in `cache_dir`.
///
/// The document is written to a sibling temp file and renamed into place so
/// readers never observe a half-written snapshot.
#[instrument(level = "debug", skip_all, fields(cache_dir = %cache_dir.display(), count = snapshot.articles.len()))]
pub async fn write_snapshot(cache_dir: &Path, snapshot: &CacheSnapshot) -> Result<(), CacheError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| CacheError::Io { path, source }
    };

    fs::create_dir_all(cache_dir).await.map_err(io_err(cache_dir))?;

    let path = snapshot_path(cache_dir);
    let tmp = cache_dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    let json = serde_json::to_string_pretty(snapshot).map_err(|source| CacheError::Parse {
        path: path.clone(),
        source,
    })?;

    fs::write(&tmp, json).await.map_err(io_err(&tmp))?;
    fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
    debug!(path = %path.display(), "Wrote cache snapshot");
    Ok(())
}

/// Load every source's cached articles, in [`Source::ALL`] order, regardless
/// of freshness.
pub async fn load_all<F>(cache_dir_for: F) -> Vec<Article>
where
    F: Fn(Source) -> PathBuf,
{
    let mut all = Vec::new();
    for source in Source::ALL {
        let dir = cache_dir_for(source);
        match read_snapshot(&dir).await {
            Ok(Some(snapshot)) => all.extend(snapshot.into_articles(source)),
            Ok(None) => warn!(%source, path = %snapshot_path(&dir).display(), "No cache snapshot found"),
            Err(e) => error!(%source, error = %e, "Failed to parse cache snapshot"),
        }
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CachedArticle;
    use tempfile::TempDir;

    fn snapshot_at(timestamp: DateTime<Local>, n: usize) -> CacheSnapshot {
        CacheSnapshot {
            timestamp,
            articles: (0..n)
                .map(|i| CachedArticle {
                    title: format!("Article {i}"),
                    url: format!("https://example.com/{i}"),
                    content: format!("content {i}"),
                    id: None,
                    summary: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_freshness_window_boundaries() {
        let now = Local::now();
        assert!(is_fresh(&snapshot_at(now - TimeDelta::minutes(179), 0), now));
        assert!(!is_fresh(&snapshot_at(now - TimeDelta::hours(3), 0), now));
        assert!(!is_fresh(&snapshot_at(now - TimeDelta::hours(5), 0), now));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_snapshot(dir.path()).await.unwrap().is_none());
        assert!(load_snapshot(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_a_miss() {
        let dir = TempDir::new().unwrap();
        std::fs::write(snapshot_path(dir.path()), "{not json").unwrap();
        assert!(matches!(
            read_snapshot(dir.path()).await,
            Err(CacheError::Parse { .. })
        ));
        assert!(load_snapshot(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("qbitai/cache");
        let now = Local::now();

        write_snapshot(&cache_dir, &snapshot_at(now, 4)).await.unwrap();
        write_snapshot(&cache_dir, &snapshot_at(now, 2)).await.unwrap();

        let loaded = read_snapshot(&cache_dir).await.unwrap().unwrap();
        assert_eq!(loaded.articles.len(), 2);
        assert!(!cache_dir.join("articles.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_all_tags_sources_in_order() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let dir_for = |s: Source| root.join(s.name());

        write_snapshot(&dir_for(Source::Qbitai), &snapshot_at(Local::now(), 1))
            .await
            .unwrap();
        write_snapshot(&dir_for(Source::Aiera), &snapshot_at(Local::now(), 2))
            .await
            .unwrap();
        std::fs::create_dir_all(dir_for(Source::Jiqizhixin)).unwrap();
        std::fs::write(snapshot_path(&dir_for(Source::Jiqizhixin)), "[]").unwrap();

        let articles = load_all(dir_for).await;
        let sources: Vec<Source> = articles.iter().map(|a| a.source).collect();
        assert_eq!(sources, vec![Source::Aiera, Source::Aiera, Source::Qbitai]);
    }
}
