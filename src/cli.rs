//! Command-line interface definitions for Daily Digest.
//!
//! This module defines the CLI arguments and subcommands using the `clap`
//! crate. Global options can also be provided via environment variables.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the Daily Digest application.
///
/// # Examples
///
/// ```sh
/// # Generate (or reuse) today's report
/// daily_digest report
///
/// # Deep read of one article by its id
/// daily_digest deep-read 3fa9c
///
/// # Custom config and data directory
/// daily_digest -c ./digest.yaml -d ./data report
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "DAILY_DIGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding caches, locks and rendered images
    #[arg(short, long, env = "DAILY_DIGEST_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Generate today's report image, reusing it if still fresh
    Report,
    /// Render an in-depth reading of one article
    DeepRead {
        /// Article id as shown in the report
        id: String,
    },
    /// Refresh every source cache without rendering
    Extract,
    /// List cached articles and their ids
    List,
    /// Print the crontab line for the configured schedule
    Schedule,
}
