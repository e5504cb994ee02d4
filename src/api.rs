//! LLM provider interaction with exponential backoff retry logic.
//!
//! This module provides the interface used to request summaries and
//! long-form interpretations from an OpenAI-compatible chat completion API.
//!
//! # Architecture
//!
//! - [`LlmProvider`]: Core trait defining async LLM interaction
//! - [`OpenAiCompatProvider`]: Chat Completions client built on `reqwest`
//! - [`RetryAsk`]: Decorator that adds retry logic to any `LlmProvider`
//! - [`ProviderRegistry`]: Configured providers, looked up by id
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//!
//! Only transport and HTTP failures are retried. An empty completion is a
//! valid "no result" answer and is returned as `Ok(None)`.

use crate::config::{LlmConfig, ProviderConfig};
use async_trait::async_trait;
use rand::{rng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Trait for async LLM interaction.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Identifier the provider is registered under.
    fn id(&self) -> &str;

    /// Send a prompt and receive the completion text.
    ///
    /// `long_text` asks for a long-form answer (larger output budget).
    /// `Ok(None)` means the provider answered without any text.
    async fn ask(&self, prompt: &str, long_text: bool) -> Result<Option<String>, LlmError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`LlmProvider`].
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The underlying LLM client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: LlmProvider,
{
    /// Create a new retry wrapper around an existing [`LlmProvider`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = OpenAiCompatProvider::new("openai", &provider_config)?;
    /// let retry_client = RetryAsk::new(client, 5, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<T> LlmProvider for RetryAsk<T>
where
    T: LlmProvider,
{
    fn id(&self) -> &str {
        self.inner.id()
    }

    #[instrument(level = "info", skip_all, fields(provider = %self.inner.id(), long_text))]
    async fn ask(&self, prompt: &str, long_text: bool) -> Result<Option<String>, LlmError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(prompt, long_text).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self
                        .base_delay
                        .saturating_mul(1u32.checked_shl((attempt - 1) as u32).unwrap_or(u32::MAX));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible Chat Completions client.
pub struct OpenAiCompatProvider {
    id: String,
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    long_max_tokens: u32,
}

impl fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn new(id: impl Into<String>, config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(StdDuration::from_secs(10))
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        Ok(Self {
            id: id.into(),
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            long_max_tokens: config.long_max_tokens,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(level = "info", skip_all, fields(provider = %self.id, model = %self.model))]
    async fn ask(&self, prompt: &str, long_text: bool) -> Result<Option<String>, LlmError> {
        let t0 = Instant::now();
        let req = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.3,
            max_tokens: if long_text {
                self.long_max_tokens
            } else {
                self.max_tokens
            },
        };

        let mut builder = self.http.post(&self.endpoint).json(&req);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(elapsed_ms = t0.elapsed().as_millis() as u64, %status, "API call failed");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: crate::utils::truncate_for_log(&body, 300),
            });
        }

        let body: ChatResponse = resp.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            chars = text.as_ref().map(|t| t.chars().count()).unwrap_or(0),
            "API call completed"
        );
        Ok(text)
    }
}

/// Why a provider could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderLookupError {
    #[error("no LLM provider configured")]
    Unconfigured,
    #[error("LLM provider `{0}` not found")]
    NotFound(String),
}

/// Providers available to the pipeline, keyed by id.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// Build one retrying OpenAI-compatible client per configured provider.
    pub fn from_config(config: &LlmConfig) -> Result<Self, reqwest::Error> {
        let mut registry = Self::new();
        for (id, provider_config) in &config.providers {
            let client = OpenAiCompatProvider::new(id.clone(), provider_config)?;
            if client.api_key.is_none() {
                warn!(provider = %id, "No API key found for provider; sending unauthenticated requests");
            }
            registry.register(Arc::new(RetryAsk::new(
                client,
                5,
                StdDuration::from_secs(1),
            )));
        }
        Ok(registry)
    }

    /// Resolve the provider selected by configuration.
    pub fn resolve(&self, id: Option<&str>) -> Result<Arc<dyn LlmProvider>, ProviderLookupError> {
        let id = match id.map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ProviderLookupError::Unconfigured),
        };
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderLookupError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider used by tests across modules.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub enum Reply {
        Text(String),
        Nothing,
        Fail,
    }

    /// Replays scripted replies in order, then repeats `fallback`.
    pub struct ScriptedProvider {
        pub id: String,
        pub script: Mutex<VecDeque<Reply>>,
        pub fallback: fn(&str) -> Reply,
        pub calls: AtomicUsize,
        pub long_calls: AtomicUsize,
        pub delay: StdDuration,
        pub in_flight: AtomicUsize,
        pub peak: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn echo(id: &str) -> Self {
            Self::with_fallback(id, |prompt| {
                Reply::Text(format!("summary of {}", prompt.lines().last().unwrap_or_default()))
            })
        }

        pub fn with_fallback(id: &str, fallback: fn(&str) -> Reply) -> Self {
            Self {
                id: id.to_string(),
                script: Mutex::new(VecDeque::new()),
                fallback,
                calls: AtomicUsize::new(0),
                long_calls: AtomicUsize::new(0),
                delay: StdDuration::ZERO,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        pub fn push(&self, reply: Reply) {
            self.script.lock().unwrap().push_back(reply);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn ask(&self, prompt: &str, long_text: bool) -> Result<Option<String>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if long_text {
                self.long_calls.fetch_add(1, Ordering::SeqCst);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let reply = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| (self.fallback)(prompt));
            match reply {
                Reply::Text(t) => Ok(Some(t)),
                Reply::Nothing => Ok(None),
                Reply::Fail => Err(LlmError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
            }
        }
    }
}
