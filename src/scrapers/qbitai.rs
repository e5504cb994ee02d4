//! QbitAI (量子位) article listing from its RSS feed.

use super::{Candidate, ListingError, SourceAdapter};
use crate::models::Source;
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{debug, info, instrument};

pub const FEED_URL: &str = "https://www.qbitai.com/feed";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QbitaiAdapter {
    client: reqwest::Client,
    feed_url: String,
}

impl QbitaiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            feed_url: FEED_URL.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for QbitaiAdapter {
    fn source(&self) -> Source {
        Source::Qbitai
    }

    #[instrument(level = "info", skip(self))]
    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, ListingError> {
        let feed = self
            .client
            .get(&self.feed_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let candidates = parse_feed(&feed, limit)?;
        info!(count = candidates.len(), source = %self.feed_url, "Indexed QbitAI feed");
        Ok(candidates)
    }
}

/// Parse an RSS 2.0 document into at most `limit` candidates.
/// Items without a link are skipped.
pub fn parse_feed(xml: &str, limit: usize) -> Result<Vec<Candidate>, ListingError> {
    let rss: Rss = from_str(xml).map_err(|e| ListingError::Parse(e.to_string()))?;

    let candidates: Vec<Candidate> = rss
        .channel
        .items
        .into_iter()
        .filter_map(|item| {
            let url = item.link?.trim().to_string();
            if url.is_empty() {
                return None;
            }
            Some(Candidate {
                title: item.title.unwrap_or_default().trim().to_string(),
                url,
            })
        })
        .take(limit)
        .collect();
    debug!(urls = ?candidates.iter().map(|c| &c.url).collect::<Vec<_>>(), "QbitAI URLs");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>量子位</title>
    <link>https://www.qbitai.com</link>
    <description>追踪人工智能新趋势</description>
    <item>
      <title><![CDATA[OpenAI 发布新模型]]></title>
      <link>https://www.qbitai.com/2025/05/100.html</link>
      <dc:creator>editor</dc:creator>
      <pubDate>Tue, 06 May 2025 08:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Without link</title>
    </item>
    <item>
      <title>Robots and agents</title>
      <link>https://www.qbitai.com/2025/05/101.html</link>
    </item>
    <item>
      <title>Third</title>
      <link>https://www.qbitai.com/2025/05/102.html</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_skips_linkless_items_and_caps() {
        let out = parse_feed(FEED, 2).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "OpenAI 发布新模型");
        assert_eq!(out[0].url, "https://www.qbitai.com/2025/05/100.html");
        assert_eq!(out[1].title, "Robots and agents");
    }

    #[test]
    fn test_parse_feed_without_items() {
        let xml = r#"<rss><channel><title>empty</title></channel></rss>"#;
        assert!(parse_feed(xml, 10).unwrap().is_empty());
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        assert!(parse_feed("not xml at all", 10).is_err());
    }
}
