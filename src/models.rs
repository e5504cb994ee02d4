//! Data models for aggregated articles and their cached snapshots.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Source`]: The closed set of news sources the digest aggregates
//! - [`Article`]: An article as seen by the pipeline, tagged with its source
//! - [`CachedArticle`] / [`CacheSnapshot`]: The persisted per-source JSON shape
//!
//! Article identity is a short hash of the URL (see [`article_id`]). Identity
//! is only meaningful within a source; nothing dedupes across sources.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters kept from the URL digest.
pub const ARTICLE_ID_LEN: usize = 5;

/// A news source with its own adapter and cache directory.
///
/// The declaration order is the enumeration order used when merging caches
/// and when looking an article up by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Aiera,
    Jiqizhixin,
    Qbitai,
}

impl Source {
    /// Every source, in enumeration order.
    pub const ALL: [Source; 3] = [Source::Aiera, Source::Jiqizhixin, Source::Qbitai];

    /// Stable machine name, used for directories and JSON.
    pub fn name(&self) -> &'static str {
        match self {
            Source::Aiera => "aiera",
            Source::Jiqizhixin => "jiqizhixin",
            Source::Qbitai => "qbitai",
        }
    }

    /// Human-facing label used in rendered output.
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Aiera => "AIERA",
            Source::Jiqizhixin => "Jiqizhixin",
            Source::Qbitai => "QbitAI",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|src| src.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown source: {s}"))
    }
}

/// Deterministic short identifier for an article URL.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(article_id("https://example.com/a"), article_id("https://example.com/a"));
/// assert_eq!(article_id("https://example.com/a").len(), ARTICLE_ID_LEN);
/// ```
pub fn article_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(ARTICLE_ID_LEN)
        .collect()
}

/// An article in the pipeline's pool.
///
/// `content` may legitimately be empty: extraction failures degrade to an
/// empty string rather than dropping the article.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: Source,
    pub content: String,
    pub summary: Option<String>,
    pub fetched_at: DateTime<Local>,
}

impl Article {
    /// Build a freshly fetched article, deriving its id from the URL.
    pub fn new(
        source: Source,
        title: String,
        url: String,
        content: String,
        fetched_at: DateTime<Local>,
    ) -> Self {
        Self {
            id: article_id(&url),
            title,
            url,
            source,
            content,
            summary: None,
            fetched_at,
        }
    }

    /// Rehydrate a cached record. Records written without an id (older
    /// snapshots) get one derived from their URL.
    pub fn from_cached(cached: CachedArticle, source: Source, fetched_at: DateTime<Local>) -> Self {
        let id = cached
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| article_id(&cached.url));
        Self {
            id,
            title: cached.title,
            url: cached.url,
            source,
            content: cached.content,
            summary: cached.summary,
            fetched_at,
        }
    }

    pub fn to_cached(&self) -> CachedArticle {
        CachedArticle {
            title: self.title.clone(),
            url: self.url.clone(),
            content: self.content.clone(),
            id: Some(self.id.clone()),
            summary: self.summary.clone(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// Article record as persisted inside a [`CacheSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedArticle {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// One source's persisted fetch result.
///
/// Serialized as `{"timestamp": "<ISO-8601>", "articles": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    #[serde(with = "iso_timestamp")]
    pub timestamp: DateTime<Local>,
    pub articles: Vec<CachedArticle>,
}

impl CacheSnapshot {
    pub fn from_articles(timestamp: DateTime<Local>, articles: &[Article]) -> Self {
        Self {
            timestamp,
            articles: articles.iter().map(Article::to_cached).collect(),
        }
    }

    /// Tag every cached record with `source` and the snapshot's timestamp.
    pub fn into_articles(self, source: Source) -> Vec<Article> {
        let fetched_at = self.timestamp;
        self.articles
            .into_iter()
            .map(|cached| Article::from_cached(cached, source, fetched_at))
            .collect()
    }
}

/// Timestamps are written as RFC 3339. Naive ISO-8601 timestamps (no offset)
/// are also accepted on read and interpreted in local time.
mod iso_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Local>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Local));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Local.from_local_datetime(&naive).earliest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_id_is_stable_and_short() {
        let a = article_id("https://www.qbitai.com/2025/05/1.html");
        let b = article_id("https://www.qbitai.com/2025/05/1.html");
        let c = article_id("https://www.qbitai.com/2025/05/2.html");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), ARTICLE_ID_LEN);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_source_round_trips_through_name() {
        for source in Source::ALL {
            assert_eq!(source.name().parse::<Source>().unwrap(), source);
        }
        assert_eq!("QbitAI".parse::<Source>().unwrap(), Source::Qbitai);
        assert!("cnn".parse::<Source>().is_err());
    }

    #[test]
    fn test_snapshot_accepts_naive_timestamp() {
        let json = r#"{
            "timestamp": "2025-05-06T08:30:00.123456",
            "articles": [
                {"title": "Legacy", "url": "https://aiera.com.cn/a", "content": "body"}
            ]
        }"#;
        let snapshot: CacheSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.timestamp.format("%H:%M").to_string(), "08:30");

        let articles = snapshot.into_articles(Source::Aiera);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id, article_id("https://aiera.com.cn/a"));
        assert_eq!(articles[0].source, Source::Aiera);
    }

    #[test]
    fn test_snapshot_rejects_garbage_timestamp() {
        let json = r#"{"timestamp": "yesterday", "articles": []}"#;
        assert!(serde_json::from_str::<CacheSnapshot>(json).is_err());
    }

    #[test]
    fn test_snapshot_serialization_shape() {
        let now = Local::now();
        let article = Article::new(
            Source::Jiqizhixin,
            "Title".to_string(),
            "https://www.jiqizhixin.com/articles/x".to_string(),
            String::new(),
            now,
        );
        let json = serde_json::to_value(CacheSnapshot::from_articles(now, &[article])).unwrap();
        assert!(json["timestamp"].is_string());
        let first = &json["articles"][0];
        assert_eq!(first["content"], "");
        assert!(first["id"].is_string());
        assert!(first.get("summary").is_none());
        assert!(first.get("source").is_none());
    }

    #[test]
    fn test_blank_cached_id_is_rederived() {
        let cached = CachedArticle {
            title: "t".to_string(),
            url: "https://example.com/x".to_string(),
            content: String::new(),
            id: Some("  ".to_string()),
            summary: None,
        };
        let article = Article::from_cached(cached, Source::Qbitai, Local::now());
        assert_eq!(article.id, article_id("https://example.com/x"));
        assert!(!article.has_content());
    }
}
