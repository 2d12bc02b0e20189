//! DOJ Fetcher CLI application
//!
//! Command-line interface for discovering and downloading DOJ disclosure
//! documents. Per-file failures are summarized and leave the exit code at
//! zero; configuration and fatal faults exit non-zero.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use doj_fetcher::cli::{
    handle_clean, handle_discover, handle_download, handle_query_files, handle_stats, Cli,
    Commands,
};
use doj_fetcher::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(&cli);

    info!("DOJ Fetcher v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Discover(args) => handle_discover(cli.global, args).await,
        Commands::QueryFiles(args) => handle_query_files(cli.global, args).await,
        Commands::Download(args) => handle_download(cli.global, args).await,
        Commands::Stats(args) => handle_stats(cli.global, args).await,
        Commands::Clean(args) => handle_clean(cli.global, args).await,
    }
}

/// Initialize logging based on CLI verbosity settings
fn init_logging(cli: &Cli) {
    let log_level = cli.log_level();

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("doj_fetcher={}", log_level).parse().expect("valid directive"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .init();
}
