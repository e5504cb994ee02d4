//! Deep reads: a long-form interpretation of one cached article, rendered to
//! an image and cached by article id.
//!
//! Artifacts never expire on their own. They are only invalidated by the
//! wholesale wipe that precedes every extraction run.

use crate::config::DataLayout;
use crate::extraction::load_articles;
use crate::models::Article;
use crate::render::{install_artifact, RenderError, RenderOptions, Renderer, DEEP_READ_TEMPLATE};
use crate::summarize::{Summarizer, Summary, SummaryFailure};
use crate::utils::truncate_for_log;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum DeepReadError {
    #[error("`{0}` is not a valid article id.")]
    InvalidId(String),
    #[error("No cached article has id `{0}`. Run the report or extract command first.")]
    NotFound(String),
    #[error("{0}")]
    Interpretation(SummaryFailure),
    #[error("Rendering the deep read failed: {0}")]
    Render(#[from] RenderError),
}

/// Find the first cached article with `id`, scanning sources in order.
pub async fn find_article(layout: &DataLayout, id: &str) -> Option<Article> {
    load_articles(layout).await.into_iter().find(|a| a.id == id)
}

pub struct DeepReader {
    layout: DataLayout,
    summarizer: Summarizer,
    renderer: Arc<dyn Renderer>,
    render_quality: u8,
}

impl DeepReader {
    pub fn new(layout: DataLayout, summarizer: Summarizer, renderer: Arc<dyn Renderer>, render_quality: u8) -> Self {
        Self {
            layout,
            summarizer,
            renderer,
            render_quality,
        }
    }

    /// Path of the deep-read image for `id`, generating it if needed.
    #[instrument(level = "info", skip_all, fields(%id))]
    pub async fn deep_read(&self, id: &str) -> Result<PathBuf, DeepReadError> {
        let id = id.trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DeepReadError::InvalidId(id.to_string()));
        }

        let artifact = self.layout.deep_read_path(id);
        if artifact.is_file() {
            info!(path = %artifact.display(), "Serving cached deep read");
            return Ok(artifact);
        }

        let article = find_article(&self.layout, id)
            .await
            .ok_or_else(|| DeepReadError::NotFound(id.to_string()))?;
        debug!(title = %article.title, source = %article.source, "Found article");

        let interpretation = match self.summarizer.interpret(&article).await {
            Summary::Ok(text) => text,
            Summary::Failed(reason) => {
                warn!(%reason, "Interpretation failed; nothing cached");
                return Err(DeepReadError::Interpretation(reason));
            }
        };
        debug!(interpretation = %truncate_for_log(&interpretation, 200), "Interpretation ready");

        let data = json!({
            "article": {
                "id": article.id,
                "title": article.title,
                "url": article.url,
                "source": article.source.display_name(),
            },
            "interpretation": interpretation,
        });
        let rendered = self
            .renderer
            .render(DEEP_READ_TEMPLATE, &data, &RenderOptions::jpeg(self.render_quality))
            .await?;
        install_artifact(&rendered, &artifact).await?;
        info!(path = %artifact.display(), "Deep read rendered");
        Ok(artifact)
    }
}
