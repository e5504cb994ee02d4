//! Article page loading and readable-text extraction.
//!
//! Full-text content is obtained in two steps: a [`PageLoader`] fetches the
//! article page (optionally rendering it in headless Chromium so client-side
//! content is present), then [`extract_readable_text`] pulls the readable
//! body out of the HTML with Readability.
//!
//! Both loaders hold the page for a fixed settle delay after loading, and both
//! are bounded by a per-page timeout.

use super::BROWSER_USER_AGENT;
use async_trait::async_trait;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument};

/// Per-page load timeout.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Wait after load so late content can settle.
pub const SETTLE_DELAY: Duration = Duration::from_millis(2000);

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

#[derive(Debug, Error)]
pub enum PageError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("page load exceeded {0:?}")]
    Timeout(Duration),
    #[error("refusing to load non-http url {0}")]
    Scheme(String),
    #[error("chromium failed: {0}")]
    Chrome(String),
    #[error("could not launch chromium: {0}")]
    Launch(#[from] std::io::Error),
}

/// Loads the HTML of an article page.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<String, PageError>;
}

/// Plain HTTP loader. No script execution.
#[derive(Debug, Clone)]
pub struct HttpPageLoader {
    client: reqwest::Client,
    settle_delay: Duration,
}

impl HttpPageLoader {
    pub fn new(page_timeout: Duration, settle_delay: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(page_timeout)
            .build()?;
        Ok(Self {
            client,
            settle_delay,
        })
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    #[instrument(level = "debug", skip(self))]
    async fn load(&self, url: &str) -> Result<String, PageError> {
        let html = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        sleep(self.settle_delay).await;
        debug!(bytes = html.len(), "Loaded page over HTTP");
        Ok(html)
    }
}

/// Headless Chromium loader using `--dump-dom`.
///
/// The settle delay is passed as Chromium's virtual time budget, so scripts
/// get that long to populate the DOM before it is dumped.
#[derive(Debug, Clone)]
pub struct ChromePageLoader {
    chrome_bin: String,
    page_timeout: Duration,
    settle_delay: Duration,
}

impl ChromePageLoader {
    pub fn new(chrome_bin: impl Into<String>, page_timeout: Duration, settle_delay: Duration) -> Self {
        Self {
            chrome_bin: chrome_bin.into(),
            page_timeout,
            settle_delay,
        }
    }
}

#[async_trait]
impl PageLoader for ChromePageLoader {
    #[instrument(level = "debug", skip(self))]
    async fn load(&self, url: &str) -> Result<String, PageError> {
        let parsed = url::Url::parse(url).map_err(|_| PageError::Scheme(url.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(PageError::Scheme(url.to_string()));
        }

        // one throwaway profile per launch, concurrent instances must not share it
        let profile = tempfile::tempdir()?;
        let run = Command::new(&self.chrome_bin)
            .args(chrome_args(url, self.settle_delay, profile.path()))
            .kill_on_drop(true)
            .output();

        let output = timeout(self.page_timeout, run)
            .await
            .map_err(|_| PageError::Timeout(self.page_timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PageError::Chrome(crate::utils::truncate_for_log(&stderr, 300)));
        }
        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = html.len(), "Dumped DOM from chromium");
        Ok(html)
    }
}

fn chrome_args(url: &str, settle_delay: Duration, profile: &Path) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        format!("--user-data-dir={}", profile.display()),
        format!("--user-agent={BROWSER_USER_AGENT}"),
        format!("--virtual-time-budget={}", settle_delay.as_millis()),
        "--dump-dom".to_string(),
        url.to_string(),
    ]
}

/// Extract the readable body text of an HTML page as plain text lines.
///
/// Readability picks the main content first. Pages too small for it to score
/// fall back to a plain main-content conversion. Whitespace inside each line
/// is collapsed and blank lines are dropped, so an unreadable page yields an
/// empty string.
pub fn extract_readable_text(html: &str, url: &str) -> String {
    let parsed_url = url::Url::parse(url).ok();
    let text = transform_text(html, parsed_url.as_ref(), true);
    if !text.is_empty() {
        return text;
    }
    transform_text(html, parsed_url.as_ref(), false)
}

fn transform_text(html: &str, url: Option<&url::Url>, readability: bool) -> String {
    let config = TransformConfig {
        readability,
        main_content: true,
        return_format: ReturnFormat::Text,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url,
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };
    transform_content_input(input, &config)
        .lines()
        .map(normalize_whitespace)
        .filter(|line| !line.is_empty())
        .join("\n")
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}
