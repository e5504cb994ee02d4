//! AIERA (新智元) article listing by scraping the home page.
//!
//! The site has no feed, so article links are collected from the usual
//! headline containers on the home page. Relative links are resolved against
//! the site root.

use super::page::normalize_whitespace;
use super::{Candidate, ListingError, SourceAdapter};
use crate::models::Source;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, instrument};
use url::Url;

pub const HOME_URL: &str = "https://aiera.com.cn/";

static HEADLINE_LINKS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("article a, .post-title a, .entry-title a, h2 a, h3 a").expect("static selector")
});

#[derive(Debug, Clone)]
pub struct AieraAdapter {
    client: reqwest::Client,
    home_url: String,
}

impl AieraAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            home_url: HOME_URL.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for AieraAdapter {
    fn source(&self) -> Source {
        Source::Aiera
    }

    #[instrument(level = "info", skip(self))]
    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, ListingError> {
        let base = Url::parse(&self.home_url)?;
        let html = self
            .client
            .get(base.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let candidates = parse_home_page(&html, &base, limit);
        info!(count = candidates.len(), source = %self.home_url, "Indexed AIERA home page");
        Ok(candidates)
    }
}

/// Collect up to `limit` unique article links from the home page.
///
/// Links with an empty title or no `href` are skipped; a URL seen twice is
/// only kept the first time.
pub fn parse_home_page(html: &str, base: &Url, limit: usize) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for link in document.select(&HEADLINE_LINKS) {
        if seen.len() >= limit {
            break;
        }
        let title = normalize_whitespace(&link.text().collect::<String>());
        let Some(href) = link.value().attr("href").map(str::trim) else {
            continue;
        };
        if title.is_empty() || href.is_empty() {
            continue;
        }
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            match base.join(href) {
                Ok(resolved) => resolved.to_string(),
                Err(_) => continue,
            }
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        candidates.push(Candidate { title, url });
    }

    debug!(urls = ?candidates.iter().map(|c| &c.url).collect::<Vec<_>>(), "AIERA URLs");
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: &str = r#"
        <html><body>
          <h2><a href="/2025/05/06/agents.html"> 智能体   突破 </a></h2>
          <article>
            <a href="https://aiera.com.cn/2025/05/06/chips.html">AI 芯片</a>
            <a href="/2025/05/06/agents.html">智能体 突破 (dup)</a>
          </article>
          <h3><a href="/no-title.html">   </a></h3>
          <h3><a>Missing href</a></h3>
          <div class="entry-title"><a href="/2025/05/05/robots.html">机器人</a></div>
          <h3><a href="/2025/05/04/old.html">Older</a></h3>
        </body></html>"#;

    #[test]
    fn test_parse_home_page_resolves_dedupes_and_skips() {
        let base = Url::parse(HOME_URL).unwrap();
        let out = parse_home_page(HOME, &base, 10);
        let urls: Vec<&str> = out.iter().map(|c| c.url.as_str()).collect();

        assert_eq!(out[0].title, "智能体 突破");
        assert!(urls.contains(&"https://aiera.com.cn/2025/05/06/agents.html"));
        assert!(urls.contains(&"https://aiera.com.cn/2025/05/06/chips.html"));
        assert!(urls.contains(&"https://aiera.com.cn/2025/05/05/robots.html"));
        assert!(!urls.iter().any(|u| u.contains("no-title")));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_parse_home_page_stops_at_limit() {
        let base = Url::parse(HOME_URL).unwrap();
        let out = parse_home_page(HOME, &base, 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_parse_home_page_empty() {
        let base = Url::parse(HOME_URL).unwrap();
        assert!(parse_home_page("<html></html>", &base, 10).is_empty());
    }
}
