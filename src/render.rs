//! Client for the external HTML-to-image render service.
//!
//! The service receives a Jinja-style template plus a JSON data mapping and
//! returns an image. [`HttpRenderer`] downloads that image into a scratch
//! directory; [`install_artifact`] then moves it to its canonical path.

use async_trait::async_trait;
use rand::{rng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument, warn};

/// Digest layout. Expects `featured_articles`, `regular_articles`,
/// `issue_number`, `date`, `weather_text` and `weather_icon`.
pub const DAILY_REPORT_TEMPLATE: &str = include_str!("../templates/daily_report.html");

/// Deep-read layout. Expects `article` and `interpretation`.
pub const DEEP_READ_TEMPLATE: &str = include_str!("../templates/deep_read.html");

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("render service error: {0}")]
    Service(String),
    #[error("render I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderOptions {
    #[serde(rename = "type")]
    pub format: ImageFormat,
    pub full_page: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

impl RenderOptions {
    /// Full-page JPEG capture at `quality`.
    pub fn jpeg(quality: u8) -> Self {
        Self {
            format: ImageFormat::Jpeg,
            full_page: true,
            quality: Some(quality.clamp(1, 100)),
        }
    }
}

/// Renders a template with data into a raster image on disk.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, template: &str, data: &Value, options: &RenderOptions) -> Result<PathBuf, RenderError>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    data: Option<GeneratedImage>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    id: String,
}

/// HTTP client for a text-to-image service exposing
/// `POST /text2img/generate` and `GET /text2img/data/<id>`.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
    scratch_dir: PathBuf,
}

impl HttpRenderer {
    pub fn new(endpoint: &str, scratch_dir: impl Into<PathBuf>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            scratch_dir: scratch_dir.into(),
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    #[instrument(level = "info", skip_all, fields(endpoint = %self.endpoint))]
    async fn render(&self, template: &str, data: &Value, options: &RenderOptions) -> Result<PathBuf, RenderError> {
        let t0 = Instant::now();
        let request = json!({
            "tmpl": template,
            "tmpldata": data,
            "json": true,
            "options": options,
        });
        let resp = self
            .client
            .post(format!("{}/text2img/generate", self.endpoint))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let generated: GenerateResponse = resp.json().await?;
        let id = match generated.data {
            Some(image) => image.id,
            None => {
                return Err(RenderError::Service(
                    generated.message.unwrap_or_else(|| "response carried no image id".to_string()),
                ));
            }
        };

        let bytes = self
            .client
            .get(format!("{}/text2img/data/{}", self.endpoint, id))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|source| RenderError::Io {
                path: self.scratch_dir.clone(),
                source,
            })?;
        let suffix: u32 = rng().random();
        let path = self
            .scratch_dir
            .join(format!("render-{suffix:08x}.{}", options.format.extension()));
        fs::write(&path, &bytes).await.map_err(|source| RenderError::Io {
            path: path.clone(),
            source,
        })?;

        info!(
            path = %path.display(),
            bytes = bytes.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Rendered image"
        );
        Ok(path)
    }
}

/// Move a rendered file to `canonical`, replacing whatever is there.
///
/// The old artifact is removed first and the new one renamed into place.
/// Renames across filesystems fall back to copy and delete.
pub async fn install_artifact(rendered: &Path, canonical: &Path) -> Result<(), RenderError> {
    let io_err = |path: &Path, source: std::io::Error| RenderError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = canonical.parent() {
        fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
    }
    match fs::remove_file(canonical).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(canonical, e)),
    }
    if let Err(e) = fs::rename(rendered, canonical).await {
        warn!(error = %e, "Rename failed; copying artifact instead");
        fs::copy(rendered, canonical).await.map_err(|e| io_err(canonical, e))?;
        fs::remove_file(rendered).await.map_err(|e| io_err(rendered, e))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Renderer fake that writes the data it was given to disk.

    use super::*;
    use std::sync::Mutex;

    pub struct FakeRenderer {
        pub out_dir: PathBuf,
        pub calls: Mutex<Vec<Value>>,
        pub fail: bool,
    }

    impl FakeRenderer {
        pub fn new(out_dir: impl Into<PathBuf>) -> Self {
            Self {
                out_dir: out_dir.into(),
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn last_data(&self) -> Option<Value> {
            self.calls.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(&self, _template: &str, data: &Value, options: &RenderOptions) -> Result<PathBuf, RenderError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(data.clone());
                calls.len()
            };
            if self.fail {
                return Err(RenderError::Service("renderer down".to_string()));
            }
            std::fs::create_dir_all(&self.out_dir).unwrap();
            let path = self
                .out_dir
                .join(format!("fake-{n}.{}", options.format.extension()));
            std::fs::write(&path, data.to_string()).unwrap();
            Ok(path)
        }
    }
}
