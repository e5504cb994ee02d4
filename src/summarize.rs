//! Article summarization and long-form interpretation.
//!
//! Every request yields a [`Summary`]: either the model's text or a
//! [`SummaryFailure`] naming what went wrong. Failures never abort a batch;
//! a batch of N articles always produces N summaries in input order.
//!
//! Batch submissions are throttled to the configured requests-per-minute by
//! staggering each task's start by `60 / rpm` seconds, while a semaphore caps
//! how many requests are in flight at once.

use crate::api::{LlmProvider, ProviderLookupError, ProviderRegistry};
use crate::models::Article;
use crate::prompts;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// Why a summary or interpretation could not be produced.
///
/// The `Display` text is the human-readable placeholder shown in place of
/// the summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryFailure {
    #[error("Summary unavailable: the article has no extracted content.")]
    EmptyContent,
    #[error("Summary unavailable: no language model provider is configured.")]
    ProviderUnconfigured,
    #[error("Summary unavailable: language model provider `{0}` was not found.")]
    ProviderNotFound(String),
    #[error("Summary unavailable: the language model request failed ({0}).")]
    ProviderError(String),
    #[error("Summary unavailable: the language model returned an empty response.")]
    EmptyResponse,
}

impl From<ProviderLookupError> for SummaryFailure {
    fn from(e: ProviderLookupError) -> Self {
        match e {
            ProviderLookupError::Unconfigured => SummaryFailure::ProviderUnconfigured,
            ProviderLookupError::NotFound(id) => SummaryFailure::ProviderNotFound(id),
        }
    }
}

/// Outcome of one summarization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Ok(String),
    Failed(SummaryFailure),
}

impl Summary {
    pub fn is_ok(&self) -> bool {
        matches!(self, Summary::Ok(_))
    }

    /// Text to display: the summary itself or the failure placeholder.
    pub fn display_text(&self) -> String {
        match self {
            Summary::Ok(text) => text.clone(),
            Summary::Failed(reason) => reason.to_string(),
        }
    }
}

/// Concurrency and rate limits for a summarization batch.
#[derive(Debug, Clone, Copy)]
pub struct SummaryLimits {
    pub max_concurrency: usize,
    pub rpm_limit: u32,
}

impl SummaryLimits {
    /// Gap between successive task submissions. Zero when unthrottled.
    pub fn submission_delay(&self) -> Duration {
        if self.rpm_limit == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / f64::from(self.rpm_limit))
        }
    }
}

/// Resolves the configured provider and turns model calls into [`Summary`]
/// values.
#[derive(Clone)]
pub struct Summarizer {
    registry: Arc<ProviderRegistry>,
    provider_id: Option<String>,
}

impl Summarizer {
    pub fn new(registry: Arc<ProviderRegistry>, provider_id: Option<String>) -> Self {
        Self {
            registry,
            provider_id,
        }
    }

    fn provider(&self) -> Result<Arc<dyn LlmProvider>, SummaryFailure> {
        self.registry
            .resolve(self.provider_id.as_deref())
            .map_err(SummaryFailure::from)
    }

    /// Summarize one article while holding a permit from `semaphore`.
    #[instrument(level = "info", skip_all, fields(id = %article.id, source = %article.source))]
    pub async fn summarize(&self, article: &Article, semaphore: &Semaphore) -> Summary {
        if !article.has_content() {
            return Summary::Failed(SummaryFailure::EmptyContent);
        }
        let provider = match self.provider() {
            Ok(provider) => provider,
            Err(reason) => return Summary::Failed(reason),
        };
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => return Summary::Failed(SummaryFailure::ProviderError(e.to_string())),
        };
        complete(provider.as_ref(), &prompts::summary_prompt(article), false).await
    }

    /// Long-form interpretation for a deep read. Not concurrency-limited.
    #[instrument(level = "info", skip_all, fields(id = %article.id, source = %article.source))]
    pub async fn interpret(&self, article: &Article) -> Summary {
        if !article.has_content() {
            return Summary::Failed(SummaryFailure::EmptyContent);
        }
        match self.provider() {
            Ok(provider) => complete(provider.as_ref(), &prompts::deep_read_prompt(article), true).await,
            Err(reason) => Summary::Failed(reason),
        }
    }

    /// Summarize every article. The result is index-aligned with `articles`.
    #[instrument(level = "info", skip_all, fields(count = articles.len()))]
    pub async fn summarize_batch(&self, articles: &[Article], limits: SummaryLimits) -> Vec<Summary> {
        let t0 = Instant::now();
        let semaphore = Semaphore::new(limits.max_concurrency.max(1));
        let semaphore = &semaphore;
        let delay = limits.submission_delay();

        let tasks = articles.iter().enumerate().map(|(i, article)| {
            let start_after = delay.saturating_mul(i as u32);
            async move {
                if !start_after.is_zero() {
                    sleep(start_after).await;
                }
                self.summarize(article, semaphore).await
            }
        });
        let summaries = join_all(tasks).await;

        let failed = summaries.iter().filter(|s| !s.is_ok()).count();
        if failed > 0 {
            warn!(failed, total = summaries.len(), "Some summaries failed");
        }
        info!(
            total = summaries.len(),
            failed,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Summarization batch complete"
        );
        summaries
    }
}

async fn complete(provider: &dyn LlmProvider, prompt: &str, long_text: bool) -> Summary {
    match provider.ask(prompt, long_text).await {
        Ok(Some(text)) if !text.trim().is_empty() => Summary::Ok(text.trim().to_string()),
        Ok(_) => Summary::Failed(SummaryFailure::EmptyResponse),
        Err(e) => {
            warn!(provider = %provider.id(), error = %e, "LLM call failed");
            Summary::Failed(SummaryFailure::ProviderError(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{Reply, ScriptedProvider};
    use crate::models::Source;
    use chrono::Local;
    use std::sync::atomic::Ordering;

    fn article(i: usize, content: &str) -> Article {
        Article::new(
            Source::Jiqizhixin,
            format!("Title {i}"),
            format!("https://www.jiqizhixin.com/articles/{i}"),
            content.to_string(),
            Local::now(),
        )
    }

    fn summarizer_with(provider: Arc<ScriptedProvider>) -> Summarizer {
        let mut registry = ProviderRegistry::new();
        registry.register(provider);
        Summarizer::new(Arc::new(registry), Some("scripted".to_string()))
    }

    const UNLIMITED: SummaryLimits = SummaryLimits {
        max_concurrency: 5,
        rpm_limit: 0,
    };

    #[tokio::test]
    async fn test_batch_yields_one_result_per_article_in_order() {
        let provider = Arc::new(ScriptedProvider::echo("scripted"));
        provider.push(Reply::Text("first".to_string()));
        provider.push(Reply::Fail);
        provider.push(Reply::Nothing);
        let summarizer = summarizer_with(provider.clone());

        let articles = vec![
            article(0, "body zero"),
            article(1, "body one"),
            article(2, "body two"),
            article(3, ""),
            article(4, "body four"),
        ];
        let summaries = summarizer.summarize_batch(&articles, UNLIMITED).await;

        assert_eq!(summaries.len(), articles.len());
        assert_eq!(summaries[3], Summary::Failed(SummaryFailure::EmptyContent));
        assert_eq!(summaries[4], Summary::Ok("summary of body four".to_string()));
        // the empty article never reaches the provider
        assert_eq!(provider.calls(), 4);
        let failures = summaries.iter().filter(|s| !s.is_ok()).count();
        assert_eq!(failures, 3);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_yields_placeholders() {
        let summarizer = Summarizer::new(Arc::new(ProviderRegistry::new()), None);
        let articles = vec![article(0, "a"), article(1, "b")];

        let summaries = summarizer.summarize_batch(&articles, UNLIMITED).await;
        assert_eq!(
            summaries,
            vec![Summary::Failed(SummaryFailure::ProviderUnconfigured); 2]
        );
    }

    #[tokio::test]
    async fn test_unknown_provider_yields_not_found() {
        let summarizer = Summarizer::new(Arc::new(ProviderRegistry::new()), Some("gpt".to_string()));
        let summary = summarizer.summarize(&article(0, "a"), &Semaphore::new(1)).await;
        assert_eq!(
            summary,
            Summary::Failed(SummaryFailure::ProviderNotFound("gpt".to_string()))
        );
        assert!(summary.display_text().contains("`gpt`"));
    }

    #[tokio::test]
    async fn test_semaphore_caps_in_flight_requests() {
        let mut provider = ScriptedProvider::echo("scripted");
        provider.delay = Duration::from_millis(30);
        let provider = Arc::new(provider);
        let summarizer = summarizer_with(provider.clone());
        let articles: Vec<Article> = (0..6).map(|i| article(i, "text")).collect();

        let limits = SummaryLimits {
            max_concurrency: 2,
            rpm_limit: 0,
        };
        let summaries = summarizer.summarize_batch(&articles, limits).await;
        assert!(summaries.iter().all(Summary::is_ok));
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_limit_staggers_submissions() {
        let provider = Arc::new(ScriptedProvider::echo("scripted"));
        let summarizer = summarizer_with(provider);
        let articles: Vec<Article> = (0..3).map(|i| article(i, "text")).collect();

        let limits = SummaryLimits {
            max_concurrency: 5,
            rpm_limit: 60,
        };
        assert_eq!(limits.submission_delay(), Duration::from_secs(1));

        let start = tokio::time::Instant::now();
        let summaries = summarizer.summarize_batch(&articles, limits).await;
        assert_eq!(summaries.len(), 3);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_interpret_uses_long_mode() {
        let provider = Arc::new(ScriptedProvider::echo("scripted"));
        let summarizer = summarizer_with(provider.clone());

        let summary = summarizer.interpret(&article(0, "deep body")).await;
        assert!(summary.is_ok());
        assert_eq!(provider.long_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_texts_are_distinct() {
        let texts: std::collections::HashSet<String> = [
            SummaryFailure::EmptyContent,
            SummaryFailure::ProviderUnconfigured,
            SummaryFailure::ProviderNotFound("x".to_string()),
            SummaryFailure::ProviderError("boom".to_string()),
            SummaryFailure::EmptyResponse,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(texts.len(), 5);
    }
}
