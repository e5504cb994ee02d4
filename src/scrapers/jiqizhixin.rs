//! Jiqizhixin (机器之心) article listing.
//!
//! Jiqizhixin exposes a JSON endpoint listing its latest articles sorted by
//! time. Each entry carries a `slug` from which the public article URL is
//! built, e.g. `https://www.jiqizhixin.com/articles/2025-05-06-3`.

use super::{Candidate, ListingError, SourceAdapter};
use crate::models::Source;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument};

pub const ARTICLES_API: &str = "https://www.jiqizhixin.com/api/v4/articles.json?sort=time";
pub const ARTICLE_BASE: &str = "https://www.jiqizhixin.com/articles/";

#[derive(Debug, Deserialize)]
struct ArticleList {
    #[serde(default)]
    articles: Vec<ApiArticle>,
}

#[derive(Debug, Deserialize)]
struct ApiArticle {
    #[serde(default)]
    title: String,
    #[serde(default)]
    slug: String,
}

#[derive(Debug, Clone)]
pub struct JiqizhixinAdapter {
    client: reqwest::Client,
    api_url: String,
}

impl JiqizhixinAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_url: ARTICLES_API.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for JiqizhixinAdapter {
    fn source(&self) -> Source {
        Source::Jiqizhixin
    }

    #[instrument(level = "info", skip(self))]
    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, ListingError> {
        let body = self
            .client
            .get(&self.api_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let candidates = parse_article_list(&body, limit)?;
        info!(count = candidates.len(), source = %self.api_url, "Indexed Jiqizhixin articles");
        Ok(candidates)
    }
}

/// Parse the article API response into at most `limit` candidates.
/// Entries without a slug have no addressable page and are skipped.
pub fn parse_article_list(body: &str, limit: usize) -> Result<Vec<Candidate>, ListingError> {
    let list: ArticleList =
        serde_json::from_str(body).map_err(|e| ListingError::Parse(e.to_string()))?;

    let candidates: Vec<Candidate> = list
        .articles
        .into_iter()
        .filter(|a| !a.slug.trim().is_empty())
        .take(limit)
        .map(|a| Candidate {
            title: a.title.trim().to_string(),
            url: format!("{ARTICLE_BASE}{}", a.slug.trim()),
        })
        .collect();
    debug!(urls = ?candidates.iter().map(|c| &c.url).collect::<Vec<_>>(), "Jiqizhixin URLs");
    Ok(candidates)
}
