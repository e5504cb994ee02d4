//! # Daily Digest
//!
//! An AI news digest pipeline. It collects articles from Chinese AI news
//! sites, extracts their readable text, summarizes a random selection through
//! an LLM and renders the result as a single newspaper-style image.
//!
//! ## Features
//!
//! - Fetches articles from AIERA, Jiqizhixin and QbitAI with a three-hour
//!   per-source cache
//! - Bounds page extraction with one fetch semaphore shared by all sources
//! - Summarizes under an LLM concurrency cap and requests-per-minute limit
//! - Numbers each issue through a cross-process counter
//! - Renders reports and per-article deep reads through an HTML-to-image
//!   service
//!
//! ## Usage
//!
//! ```sh
//! daily_digest report
//! daily_digest deep-read 3fa9c
//! ```
//!
//! ## Architecture
//!
//! A report run follows a pipeline:
//! 1. **Extraction**: Refresh every source cache concurrently
//! 2. **Selection**: Draw ten random articles, two of them featured
//! 3. **Summarization**: Ask the LLM for a short summary of each
//! 4. **Rendering**: Compose the template data and install the image

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod cache;
mod cli;
mod config;
mod deep_read;
mod extraction;
mod issue;
mod lock;
mod models;
mod prompts;
mod render;
mod report;
mod scrapers;
mod summarize;
mod utils;

use api::ProviderRegistry;
use cli::{Cli, Command};
use config::{Config, DataLayout, PageLoaderKind};
use deep_read::DeepReader;
use extraction::{ExtractionError, Extractor};
use render::{HttpRenderer, Renderer};
use report::{ReportError, ReportPipeline, GENERATION_LOCK_TIMEOUT};
use scrapers::page::{ChromePageLoader, HttpPageLoader, PageLoader};
use summarize::{Summarizer, SummaryLimits};
use utils::ensure_writable_dir;

const DEFAULT_CONFIG_FILE: &str = "daily_digest.yaml";

/// Exit code when another run holds the generation lock (EX_TEMPFAIL).
const EXIT_IN_PROGRESS: u8 = 75;

#[tokio::main]
#[instrument]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(?args.config, ?args.data_dir, command = ?args.command, "Parsed CLI arguments");

    let config_path = args.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .map(|d| d.join("daily_digest").join(DEFAULT_CONFIG_FILE))
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into())
    });
    let config = Config::load(&config_path)?;

    let layout = DataLayout::new(args.data_dir.clone().unwrap_or_else(DataLayout::default_root));
    if let Err(e) = ensure_writable_dir(layout.root()).await {
        error!(
            path = %layout.root().display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let code = match args.command {
        Command::Report => run_report(&config, &layout).await?,
        Command::DeepRead { id } => run_deep_read(&config, &layout, &id).await?,
        Command::Extract => run_extract(&config, &layout).await?,
        Command::List => list_articles(&layout).await,
        Command::Schedule => print_schedule(&config)?,
    };

    let elapsed = start_time.elapsed();
    info!(?elapsed, secs = elapsed.as_secs(), "Execution complete");
    Ok(code)
}

fn page_loader(config: &Config) -> Result<Arc<dyn PageLoader>, Box<dyn Error>> {
    Ok(match config.page_loader {
        PageLoaderKind::Http => Arc::new(HttpPageLoader::new(config.page_timeout(), config.settle_delay())?),
        PageLoaderKind::Chrome => Arc::new(ChromePageLoader::new(
            config.chrome_bin.clone(),
            config.page_timeout(),
            config.settle_delay(),
        )),
    })
}

fn extractor(config: &Config, layout: &DataLayout) -> Result<Extractor, Box<dyn Error>> {
    Ok(Extractor {
        adapters: scrapers::default_adapters(config.page_timeout())?,
        loader: page_loader(config)?,
        layout: layout.clone(),
        max_fetch_concurrency: config.max_fetch_concurrency,
        article_limit: config.article_limit,
    })
}

fn summarizer(config: &Config) -> Result<Summarizer, Box<dyn Error>> {
    let registry = ProviderRegistry::from_config(&config.llm)?;
    if config.llm.provider.is_none() {
        warn!("No LLM provider configured; summaries will be placeholders");
    }
    Ok(Summarizer::new(Arc::new(registry), config.llm.provider.clone()))
}

fn renderer(config: &Config, layout: &DataLayout) -> Result<Arc<dyn Renderer>, Box<dyn Error>> {
    Ok(Arc::new(HttpRenderer::new(
        &config.render.endpoint,
        layout.render_scratch_dir(),
    )?))
}

async fn run_report(config: &Config, layout: &DataLayout) -> Result<ExitCode, Box<dyn Error>> {
    let limits = SummaryLimits {
        max_concurrency: config.max_llm_concurrency,
        rpm_limit: config.llm_rpm_limit,
    };
    let pipeline = ReportPipeline::new(
        extractor(config, layout)?,
        summarizer(config)?,
        renderer(config, layout)?,
        limits,
        config.render.quality,
    );

    if let Some(path) = pipeline.cached_report() {
        info!(path = %path.display(), "Serving fresh report");
        print_artifact(&path);
        return Ok(ExitCode::SUCCESS);
    }

    Ok(match pipeline.generate_report().await {
        Ok(path) => {
            print_artifact(&path);
            ExitCode::SUCCESS
        }
        Err(e @ ReportError::InProgress) => {
            println!("{e}");
            ExitCode::from(EXIT_IN_PROGRESS)
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    })
}

async fn run_extract(config: &Config, layout: &DataLayout) -> Result<ExitCode, Box<dyn Error>> {
    Ok(match extractor(config, layout)?.run_exclusive(GENERATION_LOCK_TIMEOUT).await {
        Ok(total) => {
            println!("Refreshed caches: {total} articles.");
            ExitCode::SUCCESS
        }
        Err(e @ ExtractionError::InProgress) => {
            println!("{e}");
            ExitCode::from(EXIT_IN_PROGRESS)
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    })
}

async fn run_deep_read(config: &Config, layout: &DataLayout, id: &str) -> Result<ExitCode, Box<dyn Error>> {
    let reader = DeepReader::new(
        layout.clone(),
        summarizer(config)?,
        renderer(config, layout)?,
        config.render.quality,
    );
    Ok(match reader.deep_read(id).await {
        Ok(path) => {
            print_artifact(&path);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    })
}

async fn list_articles(layout: &DataLayout) -> ExitCode {
    let articles = extraction::load_articles(layout).await;
    if articles.is_empty() {
        eprintln!("No cached articles. Run `report` or `extract` first.");
        return ExitCode::FAILURE;
    }
    for article in &articles {
        println!("{}  {:<10}  {}", article.id, article.source.display_name(), article.title);
    }
    let latest = issue::IssueCounter::new(layout.issue_meta_path()).current().await;
    println!("{} articles; latest issue No. {latest}", articles.len());
    ExitCode::SUCCESS
}

fn print_schedule(config: &Config) -> Result<ExitCode, Box<dyn Error>> {
    let schedule = &config.schedule;
    if !schedule.enabled {
        println!("Scheduling is disabled (schedule.enabled = false).");
        return Ok(ExitCode::SUCCESS);
    }
    schedule.validate()?;
    let exe = std::env::current_exe()?;
    println!("{}", schedule.crontab_line(&format!("{} report", exe.display())));
    if !schedule.targets.is_empty() {
        println!("# targets: {}", schedule.targets.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_artifact(path: &Path) {
    println!("{}", path.display());
}
