//! Command-line argument parsing
//!
//! Defines the CLI structure with clap derive macros. Dataset selectors are
//! parsed directly into [`DatasetSelector`] values, so `3` and `3:12`
//! (dataset 3 starting at page 12) are both accepted wherever a dataset is
//! expected.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::app::DatasetSelector;

/// DOJ Fetcher - discover and download DOJ disclosure documents
#[derive(Parser, Debug)]
#[command(
    name = "doj_fetcher",
    version,
    about = "Discover and download document sets from the DOJ disclosures archive",
    long_about = "Finds the extent of each dataset with a logarithmic boundary search, \
then downloads its documents with rate limiting, retries, and resumable runs."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Artifact output directory
    #[arg(short, long, global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Snapshot and trace directory (defaults to the output directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find the last valid page of each dataset
    Discover(DiscoverArgs),

    /// List the files a download run would process, without downloading
    QueryFiles(QueryFilesArgs),

    /// Discover, enumerate, and download dataset files
    Download(DownloadArgs),

    /// Show snapshot and on-disk statistics
    Stats(StatsArgs),

    /// Remove downloaded artifacts and cached state
    Clean(CleanArgs),
}

/// Arguments for the discover command
#[derive(Args, Debug, Clone)]
pub struct DiscoverArgs {
    /// Datasets to discover (e.g. "3" or "3:12"); scans the archive when omitted
    #[arg(value_name = "DATASET[:PAGE]")]
    pub datasets: Vec<DatasetSelector>,

    /// Ignore cached boundaries and re-probe
    #[arg(short, long)]
    pub refresh: bool,

    /// Dataset id the archive scan starts from (when no datasets are given)
    #[arg(long, value_name = "N")]
    pub start_from: Option<u32>,

    /// Concurrent dataset discoveries
    #[arg(long, value_name = "N")]
    pub dataset_workers: Option<usize>,

    /// Concurrent page fetches
    #[arg(long, value_name = "N")]
    pub page_workers: Option<usize>,
}

/// Arguments for the query-files command
#[derive(Args, Debug, Clone)]
pub struct QueryFilesArgs {
    /// Datasets to enumerate; scans the archive when omitted
    #[arg(value_name = "DATASET[:PAGE]")]
    pub datasets: Vec<DatasetSelector>,

    /// Emit the file list as JSON
    #[arg(long)]
    pub json: bool,

    /// Ignore cached boundaries and re-probe
    #[arg(short, long)]
    pub refresh: bool,
}

/// Arguments for the download command
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Datasets to download; scans the archive when omitted
    #[arg(value_name = "DATASET[:PAGE]")]
    pub datasets: Vec<DatasetSelector>,

    /// Maximum number of fresh downloads this run
    #[arg(short, long, value_name = "N")]
    pub limit: Option<u64>,

    /// Minimum delay between download starts (e.g. "2s", "500ms")
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub delay: Option<Duration>,

    /// Concurrent file transfers
    #[arg(short = 'w', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Re-download files that already exist locally
    #[arg(short, long)]
    pub force: bool,

    /// Ignore cached boundaries and re-probe
    #[arg(short, long)]
    pub refresh: bool,

    /// Show what would be downloaded without downloading
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the stats command
#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// Emit statistics as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the clean command
#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    /// Remove only cached state, keeping downloaded artifacts
    #[arg(long)]
    pub cache_only: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments parse")
    }

    #[test]
    fn parses_download_with_selectors() {
        let cli = parse(&[
            "doj_fetcher",
            "download",
            "3",
            "5:12",
            "--limit",
            "100",
            "--delay",
            "500ms",
        ]);
        let Commands::Download(args) = cli.command else {
            panic!("expected download command");
        };
        assert_eq!(args.datasets.len(), 2);
        assert_eq!(args.datasets[1].dataset, 5);
        assert_eq!(args.datasets[1].start_page, 12);
        assert_eq!(args.limit, Some(100));
        assert_eq!(args.delay, Some(Duration::from_millis(500)));
    }

    #[test]
    fn parses_discover_scan_start() {
        let cli = parse(&["doj_fetcher", "discover", "--start-from", "7"]);
        let Commands::Discover(args) = cli.command else {
            panic!("expected discover command");
        };
        assert!(args.datasets.is_empty());
        assert_eq!(args.start_from, Some(7));
    }

    #[test]
    fn rejects_zero_dataset_id() {
        let result = Cli::try_parse_from(["doj_fetcher", "discover", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn log_level_follows_verbosity_flags() {
        assert_eq!(
            parse(&["doj_fetcher", "stats"]).log_level(),
            tracing::Level::WARN
        );
        assert_eq!(
            parse(&["doj_fetcher", "-v", "stats"]).log_level(),
            tracing::Level::INFO
        );
        assert_eq!(
            parse(&["doj_fetcher", "--very-verbose", "stats"]).log_level(),
            tracing::Level::DEBUG
        );
        assert_eq!(
            parse(&["doj_fetcher", "-q", "stats"]).log_level(),
            tracing::Level::ERROR
        );
    }

    #[test]
    fn clean_defaults_to_prompting() {
        let cli = parse(&["doj_fetcher", "clean"]);
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean command");
        };
        assert!(!args.yes);
        assert!(!args.cache_only);
    }
}
