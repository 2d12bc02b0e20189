//! Run coordination
//!
//! A [`Coordinator`] owns everything with run lifetime: the page cache and
//! its on-disk snapshot, the two worker pools, the trace recorder, and the
//! stats counters. Commands build one, drive discovery and (optionally) the
//! download pipeline through it, then call [`Coordinator::finish`] to
//! persist the snapshot and flush the trace even after a partial run.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::app::cache::{CacheSnapshot, PageCache};
use crate::app::client::PageFetcher;
use crate::app::discovery::DiscoveryEngine;
use crate::app::models::{DatasetSelector, FileEntry};
use crate::app::pipeline::{DownloadPipeline, PipelineConfig, PipelineSummary};
use crate::app::pool::WorkerPool;
use crate::app::retry::RetryPolicy;
use crate::app::storage::ArtifactStore;
use crate::app::trace::{RunStats, StatsSnapshot, TraceRecorder};
use crate::constants::workers::{
    DEFAULT_DATASET_WORKERS, DEFAULT_PAGE_WORKERS, ENTRY_CHANNEL_BUFFER,
};
use crate::errors::Result;

/// Run-level configuration assembled by the CLI layer
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the snapshot and trace files
    pub cache_dir: PathBuf,
    /// Root of the artifact tree
    pub output_dir: PathBuf,
    /// Concurrent dataset discoveries
    pub dataset_workers: usize,
    /// Concurrent page fetches
    pub page_workers: usize,
    /// Ignore cached boundaries and re-probe
    pub refresh_boundaries: bool,
    /// Retry schedule for transient faults
    pub retry: RetryPolicy,
    /// Download stage tuning
    pub pipeline: PipelineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            dataset_workers: DEFAULT_DATASET_WORKERS,
            page_workers: DEFAULT_PAGE_WORKERS,
            refresh_boundaries: false,
            retry: RetryPolicy::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Result of working one dataset
#[derive(Debug, Clone)]
pub enum DatasetOutcome {
    /// Boundary established
    Bounded {
        dataset: u32,
        boundary: u32,
        probes: u32,
    },
    /// Discovery gave up on this dataset; the run continued
    Failed { dataset: u32, reason: String },
}

impl DatasetOutcome {
    pub fn dataset(&self) -> u32 {
        match self {
            DatasetOutcome::Bounded { dataset, .. } => *dataset,
            DatasetOutcome::Failed { dataset, .. } => *dataset,
        }
    }
}

/// Everything a finished run reports
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<DatasetOutcome>,
    pub pipeline: PipelineSummary,
    pub stats: StatsSnapshot,
    pub trace_path: PathBuf,
}

/// Owner of all run-lifetime state
pub struct Coordinator {
    fetcher: Arc<dyn PageFetcher>,
    config: EngineConfig,
    cache: Arc<PageCache>,
    previous_snapshot: CacheSnapshot,
    store: ArtifactStore,
    stats: Arc<RunStats>,
    recorder: TraceRecorder,
    dataset_pool: Arc<WorkerPool>,
    page_pool: Arc<WorkerPool>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Coordinator {
    /// Load the snapshot, open the trace file, and build the run context
    pub async fn new(fetcher: Arc<dyn PageFetcher>, config: EngineConfig) -> Result<Self> {
        let previous_snapshot = CacheSnapshot::load(&config.cache_dir).await;
        let cache = if config.refresh_boundaries {
            Arc::new(PageCache::new())
        } else {
            Arc::new(PageCache::from_snapshot(&previous_snapshot).await)
        };

        let stats = RunStats::new();
        let recorder = TraceRecorder::create(&config.cache_dir, stats.run_id()).await?;
        let store = ArtifactStore::new(&config.output_dir);
        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            dataset_pool: Arc::new(WorkerPool::new(
                "datasets",
                config.dataset_workers,
            )),
            page_pool: Arc::new(WorkerPool::new("pages", config.page_workers)),
            fetcher,
            config,
            cache,
            previous_snapshot,
            store,
            stats,
            recorder,
            stop_tx,
            stop_rx,
        })
    }

    /// Request a graceful stop: no new work is dispatched, in-flight work
    /// finishes, and the summary still gets written
    pub fn request_stop(&self) {
        info!("Stop requested, finishing in-flight work");
        let _ = self.stop_tx.send(true);
    }

    /// Handle that lets a signal task stop the run
    pub fn stop_handle(&self) -> watch::Sender<bool> {
        self.stop_tx.clone()
    }

    fn stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Spawn a task that turns Ctrl-C into a graceful stop
    pub fn install_signal_handler(&self) {
        let stop = self.stop_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping gracefully");
                let _ = stop.send(true);
            }
        });
    }

    fn discovery_engine(&self) -> DiscoveryEngine {
        DiscoveryEngine::new(
            self.fetcher.clone(),
            self.cache.clone(),
            self.page_pool.clone(),
            self.config.retry.clone(),
            self.recorder.sender(),
            self.stats.clone(),
        )
    }

    /// Resolve explicit selectors, or scan the archive for datasets when
    /// none were given, starting at `scan_start` (or dataset 1)
    pub async fn resolve_selectors(
        &self,
        selectors: Vec<DatasetSelector>,
        scan_start: Option<u32>,
    ) -> Result<Vec<DatasetSelector>> {
        if !selectors.is_empty() {
            return Ok(selectors);
        }
        let start = scan_start.unwrap_or(crate::constants::discovery::DATASET_SCAN_START);
        info!("No datasets given, scanning the archive from {}", start);
        let engine = self.discovery_engine();
        let found = engine
            .scan_datasets(start)
            .await
            .map_err(crate::errors::AppError::from)?;
        Ok(found.into_iter().map(DatasetSelector::from_id).collect())
    }

    /// Discover boundaries for the selected datasets
    ///
    /// Datasets run concurrently on the dataset pool; a dataset whose
    /// discovery fails is reported as [`DatasetOutcome::Failed`] without
    /// stopping the others.
    pub async fn discover(&self, selectors: &[DatasetSelector]) -> Vec<DatasetOutcome> {
        let mut handles = Vec::with_capacity(selectors.len());
        for selector in selectors {
            if self.stopping() {
                break;
            }
            let engine = self.discovery_engine();
            let dataset = selector.dataset;
            match self
                .dataset_pool
                .submit(async move { engine.discover_boundary(dataset).await })
            {
                Ok(handle) => handles.push((dataset, handle)),
                Err(e) => {
                    warn!("Could not schedule dataset {}: {}", dataset, e);
                    break;
                }
            }
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (dataset, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(report)) => DatasetOutcome::Bounded {
                    dataset: report.dataset,
                    boundary: report.boundary,
                    probes: report.probes,
                },
                Ok(Err(e)) => {
                    self.stats.incr(&self.stats.datasets_failed);
                    DatasetOutcome::Failed {
                        dataset,
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    self.stats.incr(&self.stats.datasets_failed);
                    DatasetOutcome::Failed {
                        dataset,
                        reason: format!("discovery task failed: {}", e),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Discover and enumerate without downloading anything
    ///
    /// Boundaries are found concurrently first, then each bounded dataset
    /// is materialized page by page; the per-page fetches replay the cached
    /// discovery results.
    pub async fn query_files(
        &self,
        selectors: &[DatasetSelector],
    ) -> (Vec<DatasetOutcome>, Vec<FileEntry>) {
        let outcomes = self.discover(selectors).await;
        let engine = self.discovery_engine();

        let mut entries = Vec::new();
        for outcome in &outcomes {
            let DatasetOutcome::Bounded { dataset, .. } = outcome else {
                continue;
            };
            if self.stopping() {
                break;
            }
            let selector = selectors
                .iter()
                .find(|s| s.dataset == *dataset)
                .copied()
                .unwrap_or_else(|| DatasetSelector::from_id(*dataset));
            match engine.discover_dataset(selector).await {
                Ok(found) => {
                    entries.extend(
                        found
                            .pages
                            .values()
                            .flat_map(|page| page.files.iter().cloned()),
                    );
                }
                Err(e) => warn!("Enumeration failed for dataset {}: {}", dataset, e),
            }
        }
        (outcomes, entries)
    }

    /// Full run: discover, enumerate, and download
    pub async fn download(&self, selectors: &[DatasetSelector]) -> RunSummary {
        let outcomes = self.discover(selectors).await;

        let pipeline = DownloadPipeline::new(
            self.fetcher.clone(),
            self.store.clone(),
            self.cache.clone(),
            self.config.retry.clone(),
            self.recorder.sender(),
            self.stats.clone(),
            self.config.pipeline.clone(),
        );

        let (tx, rx) = mpsc::channel::<FileEntry>(ENTRY_CHANNEL_BUFFER);
        let consumer = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(rx).await })
        };

        // Producer side: enumerate each bounded dataset and stream its
        // entries into the pipeline. Enumeration mostly replays cached
        // discovery pages.
        let engine = self.discovery_engine();
        'datasets: for outcome in &outcomes {
            let DatasetOutcome::Bounded {
                dataset, boundary, ..
            } = outcome
            else {
                continue;
            };
            if self.stopping() {
                break;
            }
            let start_page = selectors
                .iter()
                .find(|s| s.dataset == *dataset)
                .map(|s| s.start_page)
                .unwrap_or(1);

            match engine.enumerate_files(*dataset, *boundary, start_page).await {
                Ok(entries) => {
                    for entry in entries {
                        if self.stopping() || tx.send(entry).await.is_err() {
                            break 'datasets;
                        }
                    }
                }
                Err(e) => warn!("Enumeration failed for dataset {}: {}", dataset, e),
            }
        }
        drop(tx);

        let pipeline_summary = match consumer.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Pipeline task failed: {}", e);
                pipeline.summary()
            }
        };

        RunSummary {
            outcomes,
            pipeline: pipeline_summary,
            stats: self.stats.snapshot(),
            trace_path: self.recorder.path().to_path_buf(),
        }
    }

    /// Shared counters, for progress display
    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    /// Stats counters so far
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.cache_hits = self.cache.counters().hits;
        snapshot
    }

    /// Drain the pools, persist the snapshot, and flush the trace
    ///
    /// Always called, including after an interrupted run, so partial
    /// progress survives.
    pub async fn finish(self) -> Result<StatsSnapshot> {
        self.dataset_pool.drain().await;
        self.page_pool.drain().await;

        let stats = self.stats_snapshot();
        let snapshot = self
            .cache
            .snapshot(&self.previous_snapshot, Some(stats.clone()))
            .await;
        snapshot.save(&self.config.cache_dir).await?;

        let records = self.recorder.shutdown().await?;
        debug!("Run {} finished, {} trace records", stats.run_id, records);
        Ok(stats)
    }
}
