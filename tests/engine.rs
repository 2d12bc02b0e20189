//! End-to-end tests for the run coordinator and download pipeline
//!
//! A synthetic archive serves listing pages and PDF payloads; tests verify
//! download pacing, partial-failure behavior, limits, and cross-run resume
//! through the snapshot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;

use doj_fetcher::app::{
    CacheSnapshot, Coordinator, DatasetOutcome, DatasetSelector, EngineConfig, PageFetch,
    PageFetcher, PipelineConfig, RetryPolicy,
};
use doj_fetcher::errors::{FetchError, FetchResult};

/// Archive with two datasets; file URLs containing "broken" always 404
struct TestArchive {
    file_requests: AtomicU32,
    file_starts: Mutex<Vec<Instant>>,
}

impl TestArchive {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            file_requests: AtomicU32::new(0),
            file_starts: Mutex::new(Vec::new()),
        })
    }

    fn boundary(dataset: u32) -> u32 {
        match dataset {
            1 => 2,
            2 => 1,
            _ => 0,
        }
    }

    fn pdf() -> Vec<u8> {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(2048, b' ');
        bytes
    }
}

#[async_trait]
impl PageFetcher for TestArchive {
    async fn fetch_page(&self, dataset: u32, page: u32) -> FetchResult<PageFetch> {
        if page <= Self::boundary(dataset) {
            // Dataset 1 page 2 carries a file that will fail to download.
            let marker = if dataset == 1 && page == 2 {
                "broken"
            } else {
                "doc"
            };
            Ok(PageFetch::Content(format!(
                r#"<a href="/epstein/files/{}-d{}-p{}.pdf">file</a>
                   <a href="/epstein/files/extra-d{}-p{}.pdf">file</a>"#,
                marker, dataset, page, dataset, page
            )))
        } else {
            Ok(PageFetch::Empty)
        }
    }

    async fn fetch_file(&self, url: &str) -> FetchResult<Vec<u8>> {
        self.file_requests.fetch_add(1, Ordering::SeqCst);
        self.file_starts.lock().unwrap().push(Instant::now());
        if url.contains("broken") {
            Err(FetchError::NotFound {
                url: url.to_string(),
            })
        } else {
            Ok(Self::pdf())
        }
    }
}

fn engine_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        cache_dir: dir.path().join("cache"),
        output_dir: dir.path().join("out"),
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        },
        pipeline: PipelineConfig {
            delay: Duration::from_millis(0),
            ..PipelineConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn all_selectors() -> Vec<DatasetSelector> {
    vec![DatasetSelector::from_id(1), DatasetSelector::from_id(2)]
}

#[tokio::test]
async fn run_completes_despite_per_file_failures() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::new(TestArchive::new(), engine_config(&dir))
        .await
        .unwrap();

    let summary = coordinator.download(&all_selectors()).await;

    // Datasets 1 (2 pages) and 2 (1 page) carry 6 files, one of which 404s.
    assert_eq!(summary.pipeline.downloaded, 5);
    assert_eq!(summary.pipeline.failed, 1);
    assert!(summary
        .outcomes
        .iter()
        .all(|o| matches!(o, DatasetOutcome::Bounded { .. })));

    let stats = coordinator.finish().await.unwrap();
    assert_eq!(stats.files_downloaded, 5);
    assert_eq!(stats.files_failed, 1);

    // Artifacts landed under per-dataset directories.
    let artifact = dir
        .path()
        .join("out/raw/data-set-1/doc-d1-p1.pdf");
    assert!(artifact.exists());
}

#[tokio::test]
async fn download_limit_caps_fresh_transfers() {
    let dir = TempDir::new().unwrap();
    let mut config = engine_config(&dir);
    config.pipeline.limit = Some(2);

    let coordinator = Coordinator::new(TestArchive::new(), config)
        .await
        .unwrap();
    let summary = coordinator.download(&all_selectors()).await;
    assert!(summary.pipeline.downloaded <= 2);
    coordinator.finish().await.unwrap();
}

#[tokio::test]
async fn download_starts_are_paced() {
    let dir = TempDir::new().unwrap();
    let mut config = engine_config(&dir);
    config.pipeline.delay = Duration::from_millis(40);

    let archive = TestArchive::new();
    let coordinator = Coordinator::new(archive.clone(), config).await.unwrap();
    coordinator
        .download(&[DatasetSelector::from_id(2)])
        .await;
    coordinator.finish().await.unwrap();

    let starts = archive.file_starts.lock().unwrap();
    assert_eq!(starts.len(), 2);
    for pair in starts.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(30));
    }
}

#[tokio::test]
async fn second_run_resumes_from_snapshot() {
    let dir = TempDir::new().unwrap();
    let archive = TestArchive::new();

    let first = Coordinator::new(archive.clone(), engine_config(&dir))
        .await
        .unwrap();
    let first_summary = first.download(&all_selectors()).await;
    assert_eq!(first_summary.pipeline.downloaded, 5);
    first.finish().await.unwrap();

    let requests_after_first = archive.file_requests.load(Ordering::SeqCst);

    let second = Coordinator::new(archive.clone(), engine_config(&dir))
        .await
        .unwrap();
    let second_summary = second.download(&all_selectors()).await;
    second.finish().await.unwrap();

    // Successful downloads are skipped; only the failed file is retried.
    assert_eq!(second_summary.pipeline.downloaded, 0);
    assert_eq!(second_summary.pipeline.skipped, 5);
    assert_eq!(second_summary.pipeline.failed, 1);
    assert_eq!(
        archive.file_requests.load(Ordering::SeqCst),
        requests_after_first + 1
    );
}

#[tokio::test]
async fn snapshot_records_boundaries_and_run_stats() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::new(TestArchive::new(), engine_config(&dir))
        .await
        .unwrap();
    coordinator.download(&all_selectors()).await;
    let stats = coordinator.finish().await.unwrap();

    let snapshot = CacheSnapshot::load(&dir.path().join("cache")).await;
    assert_eq!(snapshot.boundaries.get(&1), Some(&2));
    assert_eq!(snapshot.boundaries.get(&2), Some(&1));
    let last_run = snapshot.last_run.expect("run stats persisted");
    assert_eq!(last_run.run_id, stats.run_id);
    assert_eq!(last_run.files_downloaded, 5);
}

#[tokio::test]
async fn query_files_lists_without_touching_files() {
    let dir = TempDir::new().unwrap();
    let archive = TestArchive::new();
    let coordinator = Coordinator::new(archive.clone(), engine_config(&dir))
        .await
        .unwrap();

    let (outcomes, entries) = coordinator.query_files(&all_selectors()).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(entries.len(), 6);
    assert_eq!(archive.file_requests.load(Ordering::SeqCst), 0);
    coordinator.finish().await.unwrap();
}
