//! Daily report generation.
//!
//! A report run is serialized across processes by the generation lock. Inside
//! the lock the pipeline is:
//!
//! 1. **Freshness**: Return the existing artifact if it was written within the
//!    last three hours
//! 2. **Issue number**: Allocate the next issue number (abort on -1)
//! 3. **Extraction**: Refresh every source cache and load the merged pool
//! 4. **Selection**: Shuffle, keep ten, split into two featured and the rest
//! 5. **Summaries**: Summarize the selection under the LLM limits
//! 6. **Render**: Compose the template data and install the image
//!
//! A second run that cannot take the lock within its budget gives up with
//! [`ReportError::InProgress`]; that is expected contention, not a fault.

use crate::extraction::Extractor;
use crate::issue::{IssueCounter, ISSUE_UNAVAILABLE};
use crate::lock::{FileLock, LockError};
use crate::models::Article;
use crate::render::{install_artifact, RenderError, RenderOptions, Renderer, DAILY_REPORT_TEMPLATE};
use crate::summarize::{Summarizer, SummaryLimits};
use crate::utils::modified_within;
use chrono::Local;
use rand::seq::SliceRandom;
use rand::{rng, Rng};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// How long a rendered report is served before regenerating.
pub const REPORT_FRESHNESS: Duration = Duration::from_secs(3 * 60 * 60);

pub const GENERATION_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Articles drawn from the merged pool for one report.
pub const REPORT_SAMPLE_SIZE: usize = 10;

/// Leading articles of the shuffled sample shown as featured.
pub const FEATURED_COUNT: usize = 2;

/// Decorative masthead weather, as (text, icon).
pub const WEATHER: [(&str, &str); 8] = [
    ("Sunny", "☀️"),
    ("Mostly Sunny", "🌤️"),
    ("Partly Cloudy", "⛅"),
    ("Scattered Clouds", "🌥️"),
    ("Overcast", "☁️"),
    ("Light Rain", "🌦️"),
    ("Thunderstorms", "⛈️"),
    ("Light Snow", "🌨️"),
];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("A report is already being generated; try again shortly.")]
    InProgress,
    #[error("Could not allocate an issue number; report generation aborted.")]
    IssueUnavailable,
    #[error("No articles were found to build a report from.")]
    NoArticles,
    #[error("Article extraction failed: {0}")]
    Extraction(#[source] std::io::Error),
    #[error("Rendering the report failed: {0}")]
    Render(#[from] RenderError),
    #[error("Generation lock failed: {0}")]
    Lock(#[source] LockError),
}

pub struct ReportPipeline {
    extractor: Extractor,
    summarizer: Summarizer,
    renderer: Arc<dyn Renderer>,
    issues: IssueCounter,
    limits: SummaryLimits,
    render_quality: u8,
    lock_timeout: Duration,
}

impl ReportPipeline {
    pub fn new(
        extractor: Extractor,
        summarizer: Summarizer,
        renderer: Arc<dyn Renderer>,
        limits: SummaryLimits,
        render_quality: u8,
    ) -> Self {
        let issues = IssueCounter::new(extractor.layout.issue_meta_path());
        Self {
            extractor,
            summarizer,
            renderer,
            issues,
            limits,
            render_quality,
            lock_timeout: GENERATION_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn report_path(&self) -> PathBuf {
        self.extractor.layout.report_path()
    }

    /// The existing report if it is still fresh. Checked without the lock.
    pub fn cached_report(&self) -> Option<PathBuf> {
        let path = self.report_path();
        modified_within(&path, REPORT_FRESHNESS).then_some(path)
    }

    /// Generate today's report, or return the fresh one if another run just
    /// produced it.
    #[instrument(level = "info", skip_all)]
    pub async fn generate_report(&self) -> Result<PathBuf, ReportError> {
        let lock_path = self.extractor.layout.generation_lock_path();
        let guard = match FileLock::acquire(&lock_path, self.lock_timeout).await {
            Ok(guard) => guard,
            Err(LockError::Timeout { waited, .. }) => {
                info!(waited_ms = waited.as_millis() as u64, "Report generation already in progress, skipped");
                return Err(ReportError::InProgress);
            }
            Err(e) => {
                error!(error = %e, "Could not take generation lock");
                return Err(ReportError::Lock(e));
            }
        };

        debug!(lock = %guard.path().display(), "Holding generation lock");

        // another process may have finished while we waited
        if let Some(path) = self.cached_report() {
            info!(path = %path.display(), "Fresh report already exists");
            return Ok(path);
        }

        let t0 = Instant::now();
        let result = self.run_pipeline().await;
        match &result {
            Ok(path) => info!(
                path = %path.display(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "Report generated"
            ),
            Err(ReportError::NoArticles) => warn!("No articles loaded; report skipped"),
            Err(e) => error!(error = %e, "Report generation failed"),
        }
        result
    }

    async fn run_pipeline(&self) -> Result<PathBuf, ReportError> {
        let issue_number = self.issues.next_issue_number().await;
        if issue_number == ISSUE_UNAVAILABLE {
            return Err(ReportError::IssueUnavailable);
        }

        self.extractor.run().await.map_err(ReportError::Extraction)?;
        let pool = self.extractor.load_articles().await;
        if pool.is_empty() {
            return Err(ReportError::NoArticles);
        }
        let pool_size = pool.len();

        let (mut featured, mut regular) =
            select_articles(pool, REPORT_SAMPLE_SIZE, FEATURED_COUNT, &mut rng());
        info!(
            pool = pool_size,
            featured = featured.len(),
            regular = regular.len(),
            issue_number,
            "Selected articles"
        );

        let selected: Vec<Article> = featured.iter().chain(regular.iter()).cloned().collect();
        let summaries = self.summarizer.summarize_batch(&selected, self.limits).await;
        for (article, summary) in featured.iter_mut().chain(regular.iter_mut()).zip(summaries) {
            article.summary = Some(summary.display_text());
        }

        let (weather_text, weather_icon) = pick_weather(&mut rng());
        let data = json!({
            "featured_articles": featured.iter().map(article_data).collect::<Vec<_>>(),
            "regular_articles": regular.iter().map(article_data).collect::<Vec<_>>(),
            "issue_number": issue_number,
            "date": Local::now().format("%A, %B %d, %Y").to_string(),
            "weather_text": weather_text,
            "weather_icon": weather_icon,
        });

        let rendered = self
            .renderer
            .render(DAILY_REPORT_TEMPLATE, &data, &RenderOptions::jpeg(self.render_quality))
            .await?;
        let path = self.report_path();
        install_artifact(&rendered, &path).await?;
        Ok(path)
    }
}

/// Shuffle the pool, keep `sample` of it and split off the first `featured`.
pub fn select_articles<R: Rng + ?Sized>(
    mut pool: Vec<Article>,
    sample: usize,
    featured: usize,
    rng: &mut R,
) -> (Vec<Article>, Vec<Article>) {
    pool.shuffle(rng);
    pool.truncate(sample);
    let regular = pool.split_off(featured.min(pool.len()));
    (pool, regular)
}

fn pick_weather<R: Rng + ?Sized>(rng: &mut R) -> (&'static str, &'static str) {
    WEATHER[rng.random_range(0..WEATHER.len())]
}

fn article_data(article: &Article) -> Value {
    json!({
        "id": article.id,
        "title": article.title,
        "url": article.url,
        "source": article.source.display_name(),
        "summary": article.summary.as_deref().unwrap_or_default(),
    })
}
