//! News source adapters and the shared fetch-and-extract driver.
//!
//! Each adapter only knows how to list candidate articles for its site. The
//! shared [`fetch_articles`] driver does everything else, following the same
//! two-phase pattern for every source:
//!
//! 1. **Listing**: Ask the adapter for up to `limit` candidates, dedupe by URL
//! 2. **Extraction**: Load each candidate page and extract its readable text,
//!    concurrently, bounded by a semaphore shared across all adapters
//!
//! # Supported Sources
//!
//! | Source | Module | Listing |
//! |--------|--------|---------|
//! | AIERA | [`aiera`] | Home page scrape |
//! | Jiqizhixin | [`jiqizhixin`] | JSON article API |
//! | QbitAI | [`qbitai`] | RSS feed |
//!
//! # Caching
//!
//! A fresh cache snapshot short-circuits both phases. After a network fetch the
//! snapshot is always rewritten, even when some pages failed to extract (those
//! articles keep an empty `content`). Only a failed listing leaves the old
//! snapshot in place.

pub mod aiera;
pub mod jiqizhixin;
pub mod page;
pub mod qbitai;

use crate::cache;
use crate::models::{Article, CacheSnapshot, Source};
use async_trait::async_trait;
use chrono::Local;
use futures::future::join_all;
use itertools::Itertools;
use page::PageLoader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// User agent sent by listing requests and page loaders.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// A listed article before its content has been extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("listing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("listing response could not be parsed: {0}")]
    Parse(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Site-specific candidate listing.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// List up to `limit` candidate articles, newest first.
    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, ListingError>;
}

/// Per-call fetch configuration: where the source's snapshot lives and the
/// shared handles used during extraction.
#[derive(Clone)]
pub struct FetchContext {
    pub cache_dir: PathBuf,
    pub semaphore: Arc<Semaphore>,
    pub loader: Arc<dyn PageLoader>,
}

/// Build the production adapters in [`Source::ALL`] order.
pub fn default_adapters(request_timeout: Duration) -> Result<Vec<Arc<dyn SourceAdapter>>, reqwest::Error> {
    let client = reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(request_timeout)
        .build()?;
    Ok(vec![
        Arc::new(aiera::AieraAdapter::new(client.clone())),
        Arc::new(jiqizhixin::JiqizhixinAdapter::new(client.clone())),
        Arc::new(qbitai::QbitaiAdapter::new(client)),
    ])
}

/// Drop repeated URLs (first occurrence wins) and cap to `limit`.
pub fn dedupe_candidates(candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates
        .into_iter()
        .unique_by(|c| c.url.clone())
        .take(limit)
        .collect()
}

/// Fetch up to `limit` articles for one source.
///
/// Never fails: listing errors yield an empty list (cache untouched) and
/// extraction errors yield empty content.
#[instrument(level = "info", skip_all, fields(source = %adapter.source(), limit))]
pub async fn fetch_articles(adapter: &dyn SourceAdapter, limit: usize, ctx: &FetchContext) -> Vec<Article> {
    let source = adapter.source();

    if let Some(snapshot) = cache::load_snapshot(&ctx.cache_dir).await {
        if cache::is_fresh(&snapshot, Local::now()) {
            let articles: Vec<Article> = snapshot.into_articles(source).into_iter().take(limit).collect();
            info!(count = articles.len(), "Serving articles from fresh cache");
            return articles;
        }
        debug!("Cache snapshot is stale");
    }

    info!("Fetching articles from network");
    let candidates = match adapter.list_candidates(limit).await {
        Ok(listed) => dedupe_candidates(listed, limit),
        Err(e) => {
            error!(error = %e, "Listing failed; keeping existing cache");
            return Vec::new();
        }
    };
    info!(count = candidates.len(), "Listed candidate articles");

    // join_all keeps input order, so contents line up with candidates by index
    let contents = join_all(candidates.iter().map(|c| extract_content(&c.url, ctx))).await;

    let fetched_at = Local::now();
    let articles: Vec<Article> = candidates
        .into_iter()
        .zip(contents)
        .map(|(c, content)| Article::new(source, c.title, c.url, content, fetched_at))
        .collect();

    let empty = articles.iter().filter(|a| !a.has_content()).count();
    if empty > 0 {
        warn!(empty, total = articles.len(), "Some articles have no extracted content");
    }

    let snapshot = CacheSnapshot::from_articles(fetched_at, &articles);
    if let Err(e) = cache::write_snapshot(&ctx.cache_dir, &snapshot).await {
        error!(error = %e, "Failed to write cache snapshot");
    }

    info!(count = articles.len(), "Fetched article contents");
    articles
}

async fn extract_content(url: &str, ctx: &FetchContext) -> String {
    let _permit = match ctx.semaphore.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            error!(%url, error = %e, "Fetch semaphore closed");
            return String::new();
        }
    };
    match ctx.loader.load(url).await {
        Ok(html) => {
            let text = page::extract_readable_text(&html, url);
            debug!(%url, chars = text.chars().count(), "Extracted article text");
            text
        }
        Err(e) => {
            error!(%url, error = %e, "Content extraction failed");
            String::new()
        }
    }
}
