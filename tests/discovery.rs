//! Integration tests for boundary discovery
//!
//! These tests drive the discovery engine against a synthetic archive and
//! verify the probe-count and caching guarantees end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use doj_fetcher::app::{
    DiscoveryEngine, PageCache, PageFetch, PageFetcher, RetryPolicy, RunStats, TraceRecorder,
    WorkerPool,
};
use doj_fetcher::errors::{FetchError, FetchResult};

/// Synthetic archive with configurable boundaries and failure injection
struct SyntheticArchive {
    boundaries: HashMap<u32, u32>,
    requests: AtomicU32,
    /// Fail the first N page requests with a transient error
    transient_failures: AtomicU32,
}

impl SyntheticArchive {
    fn new(boundaries: &[(u32, u32)]) -> Self {
        Self {
            boundaries: boundaries.iter().copied().collect(),
            requests: AtomicU32::new(0),
            transient_failures: AtomicU32::new(0),
        }
    }

    fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for SyntheticArchive {
    async fn fetch_page(&self, dataset: u32, page: u32) -> FetchResult<PageFetch> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let failures = self.transient_failures.load(Ordering::SeqCst);
        if failures > 0
            && self
                .transient_failures
                .compare_exchange(failures, failures - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(FetchError::ServerError { status: 503 });
        }

        let boundary = self.boundaries.get(&dataset).copied().unwrap_or(0);
        if page <= boundary {
            Ok(PageFetch::Content(format!(
                r#"<a href="/epstein/files/ds{}-page{}.pdf">document</a>"#,
                dataset, page
            )))
        } else {
            Ok(PageFetch::Empty)
        }
    }

    async fn fetch_file(&self, _url: &str) -> FetchResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: 0.0,
    }
}

struct Harness {
    engine: DiscoveryEngine,
    cache: Arc<PageCache>,
    _recorder: TraceRecorder,
    _dir: TempDir,
}

async fn harness(archive: Arc<SyntheticArchive>, page_workers: usize, attempts: u32) -> Harness {
    let dir = TempDir::new().unwrap();
    let recorder = TraceRecorder::create(dir.path(), "integration")
        .await
        .unwrap();
    let cache = Arc::new(PageCache::new());
    let engine = DiscoveryEngine::new(
        archive,
        cache.clone(),
        Arc::new(WorkerPool::new("pages", page_workers)),
        fast_retry(attempts),
        recorder.sender(),
        RunStats::new(),
    );
    Harness {
        engine,
        cache,
        _recorder: recorder,
        _dir: dir,
    }
}

#[tokio::test]
async fn boundary_search_is_logarithmic() {
    // Boundary 37: doubling passes 1,2,4,8,16,32 then hits 64 invalid,
    // binary search narrows (32, 64] to 37.
    let archive = Arc::new(SyntheticArchive::new(&[(1, 37)]));
    let h = harness(archive.clone(), 8, 1).await;

    let report = h.engine.discover_boundary(1).await.unwrap();
    assert_eq!(report.boundary, 37);
    assert!(
        archive.requests() <= 16,
        "boundary 37 took {} requests",
        archive.requests()
    );
}

#[tokio::test]
async fn large_boundary_stays_cheap() {
    let archive = Arc::new(SyntheticArchive::new(&[(1, 1000)]));
    let h = harness(archive.clone(), 8, 1).await;

    let report = h.engine.discover_boundary(1).await.unwrap();
    assert_eq!(report.boundary, 1000);
    // log2(1000) ~ 10 doublings plus ~11 bisections, with wave overshoot.
    assert!(
        archive.requests() <= 40,
        "boundary 1000 took {} requests",
        archive.requests()
    );
}

#[tokio::test]
async fn dataset_with_no_valid_first_page_is_empty() {
    let archive = Arc::new(SyntheticArchive::new(&[]));
    let h = harness(archive.clone(), 4, 1).await;

    let report = h.engine.discover_boundary(7).await.unwrap();
    assert_eq!(report.boundary, 0);
    assert_eq!(archive.requests(), 1);
}

#[tokio::test]
async fn concurrent_probes_of_one_page_share_a_fetch() {
    let archive = Arc::new(SyntheticArchive::new(&[(1, 5)]));
    let h = harness(archive.clone(), 8, 1).await;
    let engine = h.engine.clone();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        handles.push(tokio::spawn(
            async move { engine.probe_page(1, 3).await },
        ));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(archive.requests(), 1);
    let counters = h.cache.counters();
    assert_eq!(counters.misses, 1);
    assert_eq!(counters.hits, 9);
}

#[tokio::test]
async fn transient_failures_are_retried_within_the_bound() {
    // Two transient failures, three attempts allowed: page 1 succeeds on
    // the third try.
    let archive = Arc::new(SyntheticArchive::new(&[(1, 1)]).with_transient_failures(2));
    let h = harness(archive.clone(), 4, 3).await;

    let report = h.engine.discover_boundary(1).await.unwrap();
    assert_eq!(report.boundary, 1);
}

#[tokio::test]
async fn exhausted_retries_fail_the_dataset() {
    let archive = Arc::new(SyntheticArchive::new(&[(1, 5)]).with_transient_failures(100));
    let h = harness(archive.clone(), 4, 2).await;

    let result = h.engine.discover_boundary(1).await;
    assert!(result.is_err());
    // Exactly max_attempts requests for the single failing page.
    assert_eq!(archive.requests(), 2);
}

#[tokio::test]
async fn repeated_enumeration_is_idempotent_and_cached() {
    let archive = Arc::new(SyntheticArchive::new(&[(1, 4)]));
    let h = harness(archive.clone(), 4, 1).await;

    let report = h.engine.discover_boundary(1).await.unwrap();
    let first = h
        .engine
        .enumerate_files(1, report.boundary, 1)
        .await
        .unwrap();
    let requests_after_first = archive.requests();

    let second = h
        .engine
        .enumerate_files(1, report.boundary, 1)
        .await
        .unwrap();
    assert_eq!(first, second);
    // The second enumeration is served entirely from cache.
    assert_eq!(archive.requests(), requests_after_first);
}

#[tokio::test]
async fn start_page_trims_enumeration() {
    let archive = Arc::new(SyntheticArchive::new(&[(1, 4)]));
    let h = harness(archive, 4, 1).await;

    let report = h.engine.discover_boundary(1).await.unwrap();
    let entries = h
        .engine
        .enumerate_files(1, report.boundary, 3)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.page >= 3));
}
