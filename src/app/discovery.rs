//! Dataset boundary discovery
//!
//! A dataset's extent is not advertised anywhere; the only signal is whether
//! a listing page contains file links. Discovery finds the last valid page
//! with an exponential probe followed by a binary search, so a dataset with
//! boundary B costs O(log B) page requests instead of B.
//!
//! Page validity is treated as monotonic: every page up to the boundary is
//! valid and every page past it is invalid. The archive's pager behaves this
//! way; a hole in the middle would surface as an understated boundary, not
//! an error.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use url::Url;

use crate::app::cache::{PageCache, PageKey};
use crate::app::client::{listing_url, PageFetch, PageFetcher};
use crate::app::models::{Dataset, DatasetSelector, DiscoveryState, FileEntry, PageResult};
use crate::app::pool::WorkerPool;
use crate::app::retry::{retry_fetch, RetryPolicy};
use crate::app::trace::{RunStats, TraceAction, TraceOutcome, TraceRecord, TraceSender};
use crate::constants::archive;
use crate::constants::discovery::{DATASET_MISS_LIMIT, MAX_PROBE_PAGE};
use crate::errors::{FetchError, FetchResult};

/// Outcome of discovering one dataset
#[derive(Debug, Clone)]
pub struct BoundaryReport {
    pub dataset: u32,
    /// Last valid page; 0 means the dataset has no content
    pub boundary: u32,
    /// Page requests issued for this dataset (cache hits included)
    pub probes: u32,
}

/// Boundary discovery engine for one run
///
/// Cloning is cheap; all state lives behind `Arc`s shared with the rest of
/// the run context.
#[derive(Clone)]
pub struct DiscoveryEngine {
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<PageCache>,
    page_pool: Arc<WorkerPool>,
    retry: RetryPolicy,
    trace: TraceSender,
    stats: Arc<RunStats>,
    base_url: Url,
}

impl DiscoveryEngine {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<PageCache>,
        page_pool: Arc<WorkerPool>,
        retry: RetryPolicy,
        trace: TraceSender,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            page_pool,
            retry,
            trace,
            stats,
            base_url: Url::parse(archive::BASE_URL).expect("base URL is valid"),
        }
    }

    /// Fetch one listing page through the cache, with retry on transients
    pub async fn probe_page(&self, dataset: u32, page: u32) -> FetchResult<Arc<PageResult>> {
        self.fetch_page_traced(dataset, page, TraceAction::PageFetch)
            .await
    }

    /// Shared fetch path; `action` names the caller's intent in the trace
    async fn fetch_page_traced(
        &self,
        dataset: u32,
        page: u32,
        action: TraceAction,
    ) -> FetchResult<Arc<PageResult>> {
        let key = PageKey::new(dataset, page);
        let fetcher = self.fetcher.clone();
        let retry = self.retry.clone();
        let stats = self.stats.clone();
        let trace = self.trace.clone();
        let page_url = listing_url(&self.base_url, dataset, page);
        // Stays at 1 on a cache hit; the closure runs only for the fetcher.
        let attempts = Arc::new(AtomicU32::new(1));
        let attempts_made = attempts.clone();

        let started = Instant::now();
        let result = self
            .cache
            .get_or_fetch(key, || async move {
                let retried = retry_fetch(&retry, |_attempt| {
                    let fetcher = fetcher.clone();
                    async move { fetcher.fetch_page(dataset, page).await }
                })
                .await;
                attempts_made.store(retried.attempts, Ordering::SeqCst);

                if retried.attempts > 1 {
                    stats.add(&stats.retries, u64::from(retried.attempts - 1));
                    trace
                        .record(
                            TraceRecord::new(TraceAction::Retry, TraceOutcome::Success)
                                .dataset(dataset)
                                .page(page)
                                .detail(format!("{} attempts", retried.attempts)),
                        )
                        .await;
                }

                stats.incr(&stats.pages_fetched);
                match retried.outcome? {
                    PageFetch::Content(html) => {
                        Ok(PageResult::from_html(&html, &page_url, dataset, page))
                    }
                    PageFetch::Empty => Ok(PageResult::empty(dataset, page)),
                }
            })
            .await;

        let outcome = match &result {
            Ok(_) => TraceOutcome::Success,
            Err(_) => TraceOutcome::Failure,
        };
        let mut record = TraceRecord::new(action, outcome)
            .dataset(dataset)
            .page(page)
            .duration(started.elapsed());
        let attempts = attempts.load(Ordering::SeqCst);
        if attempts > 1 {
            record = record.retry_count(attempts - 1);
        }
        if let Err(e) = &result {
            record = record.detail(e.to_string());
        }
        self.trace.record(record).await;

        result
    }

    /// Probe a page on the shared page pool and report its validity
    async fn probe_validity(&self, dataset: u32, page: u32) -> FetchResult<bool> {
        let engine = self.clone();
        let handle = self
            .page_pool
            .submit(async move {
                engine
                    .fetch_page_traced(dataset, page, TraceAction::PageProbe)
                    .await
            })
            .map_err(|e| FetchError::TaskFailed {
                reason: e.to_string(),
            })?;
        match handle.await {
            Ok(result) => result.map(|p| p.valid),
            Err(e) => Err(FetchError::TaskFailed {
                reason: format!("probe task for data-set-{} page {} failed: {}", dataset, page, e),
            }),
        }
    }

    /// Find the last valid page of a dataset
    ///
    /// Phase one doubles the probe target (1, 2, 4, ...) in concurrent waves
    /// sized to the page pool until an invalid page brackets the boundary.
    /// Phase two binary-searches the bracket sequentially. Returns boundary
    /// 0 when even page 1 is invalid.
    pub async fn discover_boundary(&self, dataset: u32) -> FetchResult<BoundaryReport> {
        let mut probes = 0u32;

        if let Some(known) = self.cache.known_boundary(dataset).await {
            debug!("Dataset {} boundary known from cache: {}", dataset, known);
            return Ok(BoundaryReport {
                dataset,
                boundary: known,
                probes,
            });
        }

        probes += 1;
        if !self.probe_validity(dataset, 1).await? {
            info!("Dataset {} has no content", dataset);
            self.record_boundary(dataset, 0, probes).await;
            return Ok(BoundaryReport {
                dataset,
                boundary: 0,
                probes,
            });
        }

        // Exponential phase: wave after wave of doubling page numbers until
        // one comes back invalid or the safety cap is hit.
        let wave_size = self.page_pool.status().capacity.max(1);
        let mut low = 1u32;
        let mut high: Option<u32> = None;
        let mut next = 2u32;

        'exponential: while high.is_none() {
            let mut wave = Vec::with_capacity(wave_size);
            for _ in 0..wave_size {
                if next > MAX_PROBE_PAGE {
                    break;
                }
                wave.push(next);
                next = next.saturating_mul(2);
            }
            if wave.is_empty() {
                warn!(
                    "Dataset {} valid past probe cap {}, clamping boundary",
                    dataset, MAX_PROBE_PAGE
                );
                self.record_boundary(dataset, low, probes).await;
                return Ok(BoundaryReport {
                    dataset,
                    boundary: low,
                    probes,
                });
            }

            let mut handles = Vec::with_capacity(wave.len());
            for &page in &wave {
                let engine = self.clone();
                handles.push((page, async move { engine.probe_validity(dataset, page).await }));
            }
            // Pages in a wave are independent; run them together. The pool
            // enforces the concurrency bound inside probe_validity.
            let results =
                futures::future::join_all(handles.into_iter().map(|(page, fut)| async move {
                    (page, fut.await)
                }))
                .await;

            for (page, result) in results {
                probes += 1;
                if result? {
                    low = low.max(page);
                } else {
                    high = Some(match high {
                        Some(h) => h.min(page),
                        None => page,
                    });
                }
            }
            if high.is_some() {
                break 'exponential;
            }
        }

        // Binary phase: high is the smallest known-invalid page.
        let mut high = match high {
            Some(h) => h,
            None => unreachable!("exponential phase exits with a bracket"),
        };
        // A non-monotonic response pattern could leave low past high; keep
        // the bracket well-formed.
        if low >= high {
            low = high - 1;
        }
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            probes += 1;
            if self.probe_validity(dataset, mid).await? {
                low = mid;
            } else {
                high = mid;
            }
        }

        self.record_boundary(dataset, low, probes).await;
        Ok(BoundaryReport {
            dataset,
            boundary: low,
            probes,
        })
    }

    async fn record_boundary(&self, dataset: u32, boundary: u32, probes: u32) {
        info!(
            "Dataset {} boundary: {} ({} probes)",
            dataset, boundary, probes
        );
        self.cache.record_boundary(dataset, boundary).await;
        self.stats.incr(&self.stats.datasets_bounded);
        self.trace
            .record(
                TraceRecord::new(TraceAction::BoundaryFound, TraceOutcome::Success)
                    .dataset(dataset)
                    .detail(format!("boundary={} probes={}", boundary, probes)),
            )
            .await;
    }

    /// Scan dataset ids upward from `start` until a run of misses
    ///
    /// A dataset "exists" when its first page is valid. The scan stops after
    /// [`DATASET_MISS_LIMIT`] consecutive empty datasets; a blocked response
    /// aborts the scan since every later probe would be blocked too.
    pub async fn scan_datasets(&self, start: u32) -> FetchResult<Vec<u32>> {
        let mut found = Vec::new();
        let mut misses = 0u32;
        let mut id = start.max(1);

        while misses < DATASET_MISS_LIMIT {
            let valid = match self.probe_validity(id, 1).await {
                Ok(valid) => valid,
                Err(e @ FetchError::Blocked { .. }) => return Err(e),
                Err(e) => {
                    warn!("Dataset {} scan probe failed: {}", id, e);
                    false
                }
            };

            let outcome = if valid {
                misses = 0;
                found.push(id);
                TraceOutcome::Success
            } else {
                misses += 1;
                TraceOutcome::Skipped
            };
            self.trace
                .record(TraceRecord::new(TraceAction::DatasetScan, outcome).dataset(id))
                .await;
            id += 1;
        }

        info!(
            "Dataset scan from {}: {} datasets found",
            start,
            found.len()
        );
        Ok(found)
    }

    /// Discover a dataset and materialize its pages
    ///
    /// Drives the full state machine for one dataset: probe for the
    /// boundary, then collect each page from `selector.start_page` up to it.
    pub async fn discover_dataset(
        &self,
        selector: DatasetSelector,
    ) -> FetchResult<Dataset> {
        let mut dataset = Dataset::new(selector.dataset);
        dataset.state = DiscoveryState::Probing;

        let report = self.discover_boundary(selector.dataset).await?;
        dataset.bound(report.boundary);

        for page in selector.start_page.max(1)..=report.boundary {
            let result = self.probe_page(selector.dataset, page).await?;
            dataset.pages.insert(page, result);
        }
        self.stats
            .add(&self.stats.files_discovered, dataset.file_count() as u64);
        Ok(dataset)
    }

    /// Collect every file entry of a dataset from `start_page` to `boundary`
    ///
    /// Pages are fetched through the cache on the page pool, so enumeration
    /// after discovery mostly replays cached probe results.
    pub async fn enumerate_files(
        &self,
        dataset: u32,
        boundary: u32,
        start_page: u32,
    ) -> FetchResult<Vec<FileEntry>> {
        let start = start_page.max(1);
        if boundary == 0 || start > boundary {
            return Ok(Vec::new());
        }

        let mut handles = Vec::new();
        for page in start..=boundary {
            let engine = self.clone();
            handles.push(async move { engine.probe_page(dataset, page).await });
        }
        let results = futures::future::join_all(handles).await;

        let mut entries = Vec::new();
        for result in results {
            let page = result?;
            entries.extend(page.files.iter().cloned());
        }
        self.stats
            .add(&self.stats.files_discovered, entries.len() as u64);
        Ok(entries)
    }
}
