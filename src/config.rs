//! Runtime configuration and on-disk layout.
//!
//! Configuration is read from a YAML file. Every key is optional; a missing
//! file means all defaults. Example:
//!
//! ```yaml
//! max_fetch_concurrency: 3
//! max_llm_concurrency: 5
//! llm_rpm_limit: 60
//! article_limit: 10
//! page_loader: chrome
//! llm:
//!   provider: deepseek
//!   providers:
//!     deepseek:
//!       base_url: https://api.deepseek.com/v1
//!       model: deepseek-chat
//!       api_key_env: DEEPSEEK_API_KEY
//! render:
//!   endpoint: http://localhost:8999
//! schedule:
//!   enabled: true
//!   cron: "0 8 * * *"
//!   targets: ["group:123456"]
//! ```

use crate::models::Source;
use crate::scrapers::page::{PAGE_TIMEOUT, SETTLE_DELAY};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("cron expression `{0}` must have exactly five fields")]
    InvalidCron(String),
}

/// How article pages are loaded before text extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageLoaderKind {
    #[default]
    Http,
    Chrome,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_fetch_concurrency: usize,
    pub max_llm_concurrency: usize,
    pub llm_rpm_limit: u32,
    pub article_limit: usize,
    pub page_loader: PageLoaderKind,
    pub chrome_bin: String,
    pub settle_delay_ms: u64,
    pub page_timeout_secs: u64,
    pub llm: LlmConfig,
    pub render: RenderConfig,
    pub schedule: ScheduleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_fetch_concurrency: 3,
            max_llm_concurrency: 5,
            llm_rpm_limit: 60,
            article_limit: 10,
            page_loader: PageLoaderKind::default(),
            chrome_bin: "chromium".to_string(),
            settle_delay_ms: SETTLE_DELAY.as_millis() as u64,
            page_timeout_secs: PAGE_TIMEOUT.as_secs(),
            llm: LlmConfig::default(),
            render: RenderConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config = Self::from_yaml(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!("Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        // an empty document parses as null; treat it like a missing file
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.schedule.validate()?;
        Ok(config)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Id of the provider to use; `None` leaves summarization unconfigured.
    pub provider: Option<String>,
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_long_max_tokens")]
    pub long_max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    300
}
fn default_long_max_tokens() -> u32 {
    2000
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Base URL of the HTML-to-image service.
    pub endpoint: String,
    pub quality: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8999".to_string(),
            quality: 90,
        }
    }
}

/// Schedule settings handed to the external cron trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Standard five-field cron expression.
    pub cron: String,
    /// Delivery targets, passed through untouched.
    pub targets: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: "0 8 * * *".to_string(),
            targets: Vec::new(),
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cron.split_whitespace().count() != 5 {
            return Err(ConfigError::InvalidCron(self.cron.clone()));
        }
        Ok(())
    }

    /// The crontab line an external scheduler should install.
    pub fn crontab_line(&self, command: &str) -> String {
        let fields = self.cron.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("{fields} {command}")
    }
}

/// Paths of everything the application persists under its data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform data dir joined with the application name, falling back to
    /// a relative `data` directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("daily_digest"))
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_cache_dir(&self, source: Source) -> PathBuf {
        self.root.join("sources").join(source.name()).join("cache")
    }

    pub fn deep_read_dir(&self) -> PathBuf {
        self.root.join("deep_read")
    }

    pub fn deep_read_path(&self, article_id: &str) -> PathBuf {
        self.deep_read_dir().join(format!("{article_id}.jpg"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("daily_report.jpg")
    }

    pub fn issue_meta_path(&self) -> PathBuf {
        self.root.join("issue_meta.json")
    }

    pub fn generation_lock_path(&self) -> PathBuf {
        self.root.join("report_generation.lock")
    }

    /// Scratch space for render output before it is moved into place.
    pub fn render_scratch_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }
}
