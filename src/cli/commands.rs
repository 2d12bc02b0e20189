//! Command handlers
//!
//! Each handler builds a [`Coordinator`] over the real archive client,
//! drives it, and prints a human-readable summary. Per-file and per-dataset
//! failures are reported in the summary and leave the exit code at zero;
//! only configuration problems and fatal faults (a blocked archive, an
//! unwritable cache) bubble up as errors.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::app::{
    ArchiveClient, ArtifactStore, CacheSnapshot, Coordinator, DatasetOutcome, EngineConfig,
    PageFetcher,
};
use crate::cli::args::{
    CleanArgs, DiscoverArgs, DownloadArgs, GlobalArgs, QueryFilesArgs, StatsArgs,
};
use crate::config::AppConfig;
use crate::constants::files::TRACE_FILE_PREFIX;
use crate::errors::{AppError, Result};

/// Resolve configuration from file and global flags
async fn load_engine_config(global: &GlobalArgs) -> Result<EngineConfig> {
    AppConfig::initialize_first_run().await?;
    let config = AppConfig::load(global.config.clone()).await?;
    let mut engine = config.engine_config();

    if let Some(output_dir) = &global.output_dir {
        engine.output_dir = output_dir.clone();
        engine.cache_dir = output_dir.clone();
    }
    if let Some(cache_dir) = &global.cache_dir {
        engine.cache_dir = cache_dir.clone();
    }
    Ok(engine)
}

fn archive_fetcher() -> Result<Arc<dyn PageFetcher>> {
    let client = ArchiveClient::new().map_err(AppError::Fetch)?;
    Ok(Arc::new(client))
}

fn discovery_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap()
            .tick_strings(&["◐", "◓", "◑", "◒"]),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn print_outcomes(outcomes: &[DatasetOutcome]) {
    for outcome in outcomes {
        match outcome {
            DatasetOutcome::Bounded {
                dataset,
                boundary,
                probes,
            } => {
                if *boundary == 0 {
                    println!("  data-set-{dataset}: empty ({probes} probes)");
                } else {
                    println!("  data-set-{dataset}: {boundary} pages ({probes} probes)");
                }
            }
            DatasetOutcome::Failed { dataset, reason } => {
                println!("  data-set-{dataset}: FAILED - {reason}");
            }
        }
    }
}

fn failed_count(outcomes: &[DatasetOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| matches!(o, DatasetOutcome::Failed { .. }))
        .count()
}

/// Handle the discover command
pub async fn handle_discover(global: GlobalArgs, args: DiscoverArgs) -> Result<()> {
    let mut engine = load_engine_config(&global).await?;
    engine.refresh_boundaries = args.refresh;
    if let Some(n) = args.dataset_workers {
        engine.dataset_workers = n.max(1);
    }
    if let Some(n) = args.page_workers {
        engine.page_workers = n.max(1);
    }

    let coordinator = Coordinator::new(archive_fetcher()?, engine).await?;
    coordinator.install_signal_handler();

    let spinner = discovery_spinner("Discovering dataset boundaries...");
    let selectors = coordinator
        .resolve_selectors(args.datasets, args.start_from)
        .await?;
    let outcomes = coordinator.discover(&selectors).await;
    spinner.finish_and_clear();

    println!("Discovered {} dataset(s):", outcomes.len());
    print_outcomes(&outcomes);
    if failed_count(&outcomes) > 0 {
        println!("{} dataset(s) could not be discovered", failed_count(&outcomes));
    }

    let stats = coordinator.finish().await?;
    println!(
        "{} page requests, {} cache hits, {:.1}s",
        stats.pages_fetched, stats.cache_hits, stats.elapsed_seconds
    );
    Ok(())
}

/// Handle the query-files command
pub async fn handle_query_files(global: GlobalArgs, args: QueryFilesArgs) -> Result<()> {
    let mut engine = load_engine_config(&global).await?;
    engine.refresh_boundaries = args.refresh;

    let coordinator = Coordinator::new(archive_fetcher()?, engine).await?;
    coordinator.install_signal_handler();

    let spinner = discovery_spinner("Enumerating files...");
    let selectors = coordinator.resolve_selectors(args.datasets, None).await?;
    let (outcomes, entries) = coordinator.query_files(&selectors).await;
    spinner.finish_and_clear();

    if args.json {
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| AppError::generic(format!("could not serialize file list: {e}")))?;
        println!("{json}");
    } else {
        print_outcomes(&outcomes);
        for entry in &entries {
            println!("{}", entry.url);
        }
        println!("{} file(s) across {} dataset(s)", entries.len(), outcomes.len());
    }

    coordinator.finish().await?;
    Ok(())
}

/// Handle the download command
pub async fn handle_download(global: GlobalArgs, args: DownloadArgs) -> Result<()> {
    let mut engine = load_engine_config(&global).await?;
    engine.refresh_boundaries = args.refresh;
    engine.pipeline.limit = args.limit;
    engine.pipeline.refresh = args.force;
    if let Some(delay) = args.delay {
        engine.pipeline.delay = delay;
    }
    if let Some(workers) = args.workers {
        engine.pipeline.concurrency = workers.max(1);
    }

    if args.dry_run {
        // A dry run is a query: the pipeline is never constructed.
        info!("Dry run, listing files only");
        return handle_query_files(
            global,
            QueryFilesArgs {
                datasets: args.datasets,
                json: false,
                refresh: args.refresh,
            },
        )
        .await;
    }

    let coordinator = Coordinator::new(archive_fetcher()?, engine).await?;
    coordinator.install_signal_handler();

    let selectors = coordinator.resolve_selectors(args.datasets, None).await?;

    let progress = discovery_spinner("Starting...");
    let progress_stats = coordinator.stats();
    let progress_task = {
        let progress = progress.clone();
        tokio::spawn(async move {
            loop {
                let snapshot = progress_stats.snapshot();
                progress.set_message(format!(
                    "{} downloaded, {} skipped, {} failed ({:.1} MB)",
                    snapshot.files_downloaded,
                    snapshot.files_skipped,
                    snapshot.files_failed,
                    snapshot.bytes_downloaded as f64 / 1_048_576.0
                ));
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
    };

    let summary = coordinator.download(&selectors).await;
    progress_task.abort();
    progress.finish_and_clear();

    println!("Datasets:");
    print_outcomes(&summary.outcomes);
    println!(
        "Downloaded {} file(s) ({:.1} MB), {} skipped, {} failed",
        summary.pipeline.downloaded,
        summary.pipeline.bytes as f64 / 1_048_576.0,
        summary.pipeline.skipped,
        summary.pipeline.failed
    );
    if summary.pipeline.failed > 0 {
        println!(
            "Failures are recorded in {}; re-run to retry them",
            summary.trace_path.display()
        );
    }

    let stats = coordinator.finish().await?;
    println!(
        "{} page requests, {} retries, {:.1}s",
        stats.pages_fetched, stats.retries, stats.elapsed_seconds
    );
    Ok(())
}

/// Handle the stats command
pub async fn handle_stats(global: GlobalArgs, args: StatsArgs) -> Result<()> {
    let engine = load_engine_config(&global).await?;
    let snapshot = CacheSnapshot::load(&engine.cache_dir).await;
    let store = ArtifactStore::new(&engine.output_dir);
    let usage = store.usage().await.map_err(AppError::Storage)?;

    if args.json {
        let combined = serde_json::json!({
            "boundaries": snapshot.boundaries,
            "files_tracked": snapshot.files.len(),
            "last_run": snapshot.last_run,
            "disk": {
                "datasets": usage.dataset_count,
                "files": usage.file_count,
                "bytes": usage.total_bytes,
            },
        });
        println!("{}", serde_json::to_string_pretty(&combined).map_err(
            |e| AppError::generic(format!("could not serialize stats: {e}")),
        )?);
        return Ok(());
    }

    println!("Known boundaries:");
    let mut datasets: Vec<_> = snapshot.boundaries.iter().collect();
    datasets.sort();
    for (dataset, boundary) in datasets {
        println!("  data-set-{dataset}: {boundary} pages");
    }
    if snapshot.boundaries.is_empty() {
        println!("  (none discovered yet)");
    }

    println!(
        "Ledger: {} file(s) tracked, {} downloaded",
        snapshot.files.len(),
        snapshot.files.values().filter(|f| f.downloaded).count()
    );
    println!(
        "On disk: {} file(s) in {} dataset(s), {:.1} MB",
        usage.file_count,
        usage.dataset_count,
        usage.total_bytes as f64 / 1_048_576.0
    );

    if let Some(last_run) = &snapshot.last_run {
        println!(
            "Last run {}: {} downloaded, {} failed, {} retries, {:.1}s",
            last_run.run_id,
            last_run.files_downloaded,
            last_run.files_failed,
            last_run.retries,
            last_run.elapsed_seconds
        );
    }
    Ok(())
}

/// Handle the clean command
pub async fn handle_clean(global: GlobalArgs, args: CleanArgs) -> Result<()> {
    let engine = load_engine_config(&global).await?;
    let store = ArtifactStore::new(&engine.output_dir);

    if !args.yes {
        let what = if args.cache_only {
            "cached state (snapshot and traces)"
        } else {
            "all downloaded artifacts and cached state"
        };
        print!("This will remove {} under {}. Continue? [y/N] ", what, engine.output_dir.display());
        std::io::stdout().flush().map_err(AppError::Io)?;

        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .map_err(AppError::Io)?;
        if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    if !args.cache_only {
        store.remove_all().await.map_err(AppError::Storage)?;
        println!("Removed artifact tree {}", store.raw_root().display());
    }

    CacheSnapshot::remove(&engine.cache_dir)
        .await
        .map_err(AppError::Cache)?;
    let removed_traces = remove_trace_files(&engine.cache_dir).await?;
    println!(
        "Removed cache snapshot and {} trace file(s) from {}",
        removed_traces,
        engine.cache_dir.display()
    );
    Ok(())
}

/// Delete `trace_*.jsonl` files from the cache directory
async fn remove_trace_files(cache_dir: &std::path::Path) -> Result<usize> {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(cache_dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };
    while let Some(entry) = entries.next_entry().await.map_err(AppError::Io)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(TRACE_FILE_PREFIX) && name.ends_with(".jsonl") {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!("Could not remove {}: {}", name, e);
            } else {
                removed += 1;
            }
        }
    }
    Ok(removed)
}
