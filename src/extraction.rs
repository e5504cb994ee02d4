//! Extraction orchestrator: refreshes every source's cache snapshot in one
//! concurrent pass.

use crate::cache;
use crate::config::DataLayout;
use crate::lock::{FileLock, LockError};
use crate::models::Article;
use crate::scrapers::page::PageLoader;
use crate::scrapers::{fetch_articles, FetchContext, SourceAdapter};
use futures::future::join_all;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("A report or extraction run is already in progress; try again shortly.")]
    InProgress,
    #[error("Generation lock failed: {0}")]
    Lock(#[source] LockError),
    #[error("Article extraction failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to run all adapters against the on-disk layout.
#[derive(Clone)]
pub struct Extractor {
    pub adapters: Vec<Arc<dyn SourceAdapter>>,
    pub loader: Arc<dyn PageLoader>,
    pub layout: DataLayout,
    pub max_fetch_concurrency: usize,
    pub article_limit: usize,
}

impl Extractor {
    /// Run every adapter concurrently under one shared fetch semaphore.
    ///
    /// The deep-read cache is wiped and recreated first, so interpretations
    /// rendered before this refresh are no longer served. Returns the number
    /// of articles the adapters produced.
    #[instrument(level = "info", skip_all, fields(adapters = self.adapters.len(), max_fetch = self.max_fetch_concurrency))]
    pub async fn run(&self) -> std::io::Result<usize> {
        let t0 = Instant::now();
        reset_dir(&self.layout.deep_read_dir()).await?;

        let semaphore = Arc::new(Semaphore::new(self.max_fetch_concurrency.max(1)));
        let tasks = self.adapters.iter().map(|adapter| {
            let ctx = FetchContext {
                cache_dir: self.layout.source_cache_dir(adapter.source()),
                semaphore: semaphore.clone(),
                loader: self.loader.clone(),
            };
            async move { fetch_articles(adapter.as_ref(), self.article_limit, &ctx).await }
        });
        let per_source = join_all(tasks).await;

        let total: usize = per_source.iter().map(Vec::len).sum();
        info!(
            total,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Extraction complete"
        );
        Ok(total)
    }

    /// [`Extractor::run`] under the generation lock, for refreshes that are
    /// not part of a report run. Gives up with
    /// [`ExtractionError::InProgress`] if the lock stays busy past
    /// `lock_timeout`.
    #[instrument(level = "info", skip_all)]
    pub async fn run_exclusive(&self, lock_timeout: Duration) -> Result<usize, ExtractionError> {
        let _guard = match FileLock::acquire(self.layout.generation_lock_path(), lock_timeout).await {
            Ok(guard) => guard,
            Err(LockError::Timeout { waited, .. }) => {
                info!(waited_ms = waited.as_millis() as u64, "Generation already in progress, extraction skipped");
                return Err(ExtractionError::InProgress);
            }
            Err(e) => {
                error!(error = %e, "Could not take generation lock");
                return Err(ExtractionError::Lock(e));
            }
        };
        Ok(self.run().await?)
    }

    /// Merged cached articles across all sources.
    pub async fn load_articles(&self) -> Vec<Article> {
        load_articles(&self.layout).await
    }
}

/// Merged cached articles in source order, regardless of freshness.
pub async fn load_articles(layout: &DataLayout) -> Vec<Article> {
    cache::load_all(|source| layout.source_cache_dir(source)).await
}

async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => info!(path = %dir.display(), "Cleared deep-read cache"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir).await
}
