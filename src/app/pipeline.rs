//! Download pipeline
//!
//! Consumes the stream of discovered file entries and materializes them on
//! disk. Download starts are paced by a rate limiter so the archive sees at
//! most one new transfer per configured delay, while a small worker pool
//! bounds how many transfers run at once. Per-file failures are recorded
//! and skipped over; they never abort the run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::cache::PageCache;
use crate::app::client::PageFetcher;
use crate::app::models::FileEntry;
use crate::app::pool::WorkerPool;
use crate::app::retry::{retry_fetch, RetryPolicy};
use crate::app::storage::ArtifactStore;
use crate::app::trace::{RunStats, TraceAction, TraceOutcome, TraceRecord, TraceSender};
use crate::constants::limits::BACKOFF_JITTER_FACTOR;
use crate::constants::workers::DEFAULT_DOWNLOAD_WORKERS;

/// Pipeline tuning knobs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum delay between download starts
    pub delay: Duration,
    /// Concurrent transfer bound
    pub concurrency: usize,
    /// Stop dispatching after this many fresh downloads
    pub limit: Option<u64>,
    /// Re-download files that are already materialized
    pub refresh: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            delay: crate::constants::limits::DEFAULT_DOWNLOAD_DELAY,
            concurrency: DEFAULT_DOWNLOAD_WORKERS,
            limit: None,
            refresh: false,
        }
    }
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes: u64,
}

/// Rate-limited, bounded-concurrency download stage
pub struct DownloadPipeline {
    fetcher: Arc<dyn PageFetcher>,
    store: ArtifactStore,
    cache: Arc<PageCache>,
    retry: RetryPolicy,
    trace: TraceSender,
    stats: Arc<RunStats>,
    config: PipelineConfig,
    limiter: Option<DefaultDirectRateLimiter>,
    jitter: Jitter,
    downloaded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

impl DownloadPipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: ArtifactStore,
        cache: Arc<PageCache>,
        retry: RetryPolicy,
        trace: TraceSender,
        stats: Arc<RunStats>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        // A zero delay yields no quota and disables pacing entirely.
        let limiter = Quota::with_period(config.delay).map(RateLimiter::direct);
        let jitter = Jitter::up_to(config.delay.mul_f64(BACKOFF_JITTER_FACTOR));

        Arc::new(Self {
            fetcher,
            store,
            cache,
            retry,
            trace,
            stats,
            config,
            limiter,
            jitter,
            downloaded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        })
    }

    /// Drain the entry stream, downloading until it closes or the dispatch
    /// limit is reached
    pub async fn run(self: &Arc<Self>, mut entries: mpsc::Receiver<FileEntry>) -> PipelineSummary {
        let pool = WorkerPool::new("downloads", self.config.concurrency);
        let mut dispatched = 0u64;

        while let Some(entry) = entries.recv().await {
            if !self.config.refresh && self.already_have(&entry).await {
                self.skip(&entry, "already downloaded").await;
                continue;
            }

            if let Some(limit) = self.config.limit {
                if dispatched >= limit {
                    info!("Download limit of {} reached, stopping dispatch", limit);
                    break;
                }
            }

            dispatched += 1;
            let pipeline = self.clone();
            if pool
                .submit(async move { pipeline.download(entry).await })
                .is_err()
            {
                break;
            }
        }

        pool.drain().await;
        self.summary()
    }

    /// Counters accumulated so far
    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    async fn already_have(&self, entry: &FileEntry) -> bool {
        self.cache.is_downloaded(&entry.url).await || self.store.is_materialized(entry).await
    }

    async fn skip(&self, entry: &FileEntry, reason: &str) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.stats.incr(&self.stats.files_skipped);
        self.trace
            .record(
                TraceRecord::new(TraceAction::FileSkip, TraceOutcome::Skipped)
                    .dataset(entry.dataset)
                    .page(entry.page)
                    .url(entry.url.clone())
                    .detail(reason),
            )
            .await;
    }

    async fn fail(&self, entry: &FileEntry, reason: String, elapsed: Duration, retries: u32) {
        warn!("Download failed for {}: {}", entry.url, reason);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.stats.incr(&self.stats.files_failed);
        let mut record = TraceRecord::new(TraceAction::FileDownload, TraceOutcome::Failure)
            .dataset(entry.dataset)
            .page(entry.page)
            .url(entry.url.clone())
            .duration(elapsed)
            .detail(reason);
        if retries > 0 {
            record = record.retry_count(retries);
        }
        self.trace.record(record).await;
    }

    async fn download(self: Arc<Self>, mut entry: FileEntry) {
        // The pacing gate sits at the transfer start itself; a task that
        // queued on a pool permit still waits out the delay here.
        if let Some(limiter) = &self.limiter {
            limiter.until_ready_with_jitter(self.jitter).await;
        }

        let started = Instant::now();
        let retried = retry_fetch(&self.retry, |_attempt| {
            let fetcher = self.fetcher.clone();
            let url = entry.url.clone();
            async move { fetcher.fetch_file(&url).await }
        })
        .await;

        let retries = retried.attempts.saturating_sub(1);
        if retries > 0 {
            self.stats.add(&self.stats.retries, u64::from(retries));
            self.trace
                .record(
                    TraceRecord::new(TraceAction::Retry, TraceOutcome::Success)
                        .url(entry.url.clone())
                        .detail(format!("{} attempts", retried.attempts)),
                )
                .await;
        }

        let bytes = match retried.outcome {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail(&entry, e.to_string(), started.elapsed(), retries)
                    .await;
                return;
            }
        };

        match self.store.write_artifact(&entry, &bytes).await {
            Ok((path, checksum)) => {
                entry.downloaded = true;
                entry.size = Some(bytes.len() as u64);
                entry.local_path = Some(path);
                entry.checksum = Some(checksum);

                self.downloaded.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                self.stats.incr(&self.stats.files_downloaded);
                self.stats
                    .add(&self.stats.bytes_downloaded, bytes.len() as u64);

                debug!("Downloaded {} ({} bytes)", entry.file_name, bytes.len());
                let mut record =
                    TraceRecord::new(TraceAction::FileDownload, TraceOutcome::Success)
                        .dataset(entry.dataset)
                        .page(entry.page)
                        .url(entry.url.clone())
                        .duration(started.elapsed());
                if retries > 0 {
                    record = record.retry_count(retries);
                }
                self.trace.record(record).await;
                self.cache.record_download(entry).await;
            }
            Err(e) => {
                self.fail(&entry, e.to_string(), started.elapsed(), retries)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::PageFetch;
    use crate::app::trace::TraceRecorder;
    use crate::errors::{FetchError, FetchResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;
    use url::Url;

    fn pdf_bytes() -> Vec<u8> {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(2048, b' ');
        bytes
    }

    fn entry(name: &str) -> FileEntry {
        FileEntry::new(
            Url::parse(&format!("https://www.justice.gov/epstein/files/{}", name)).unwrap(),
            1,
            1,
        )
    }

    /// Serves PDFs for every URL except those containing "bad"; URLs
    /// containing "stall" hold a transfer open for the next queued duration,
    /// and "flaky" URLs fail once before succeeding.
    struct FileServer {
        starts: Mutex<Vec<Instant>>,
        stalls: Mutex<Vec<Duration>>,
        flaky_remaining: Mutex<u32>,
    }

    impl FileServer {
        fn new() -> Self {
            Self {
                starts: Mutex::new(Vec::new()),
                stalls: Mutex::new(Vec::new()),
                flaky_remaining: Mutex::new(1),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for FileServer {
        async fn fetch_page(&self, _dataset: u32, _page: u32) -> FetchResult<PageFetch> {
            Ok(PageFetch::Empty)
        }

        async fn fetch_file(&self, url: &str) -> FetchResult<Vec<u8>> {
            self.starts.lock().unwrap().push(Instant::now());
            if url.contains("stall") {
                let stall = self.stalls.lock().unwrap().pop();
                if let Some(stall) = stall {
                    tokio::time::sleep(stall).await;
                }
            }
            if url.contains("flaky") {
                let mut remaining = self.flaky_remaining.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::ServerError { status: 503 });
                }
            }
            if url.contains("bad") {
                Err(FetchError::ServerError { status: 500 })
            } else {
                Ok(pdf_bytes())
            }
        }
    }

    struct Fixture {
        pipeline: Arc<DownloadPipeline>,
        server: Arc<FileServer>,
        recorder: TraceRecorder,
        _dir: TempDir,
    }

    async fn fixture(config: PipelineConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let recorder = TraceRecorder::create(dir.path(), "test").await.unwrap();
        let server = Arc::new(FileServer::new());
        let pipeline = DownloadPipeline::new(
            server.clone(),
            ArtifactStore::new(dir.path()),
            Arc::new(PageCache::new()),
            RetryPolicy::immediate(2),
            recorder.sender(),
            RunStats::new(),
            config,
        );
        Fixture {
            pipeline,
            server,
            recorder,
            _dir: dir,
        }
    }

    fn no_delay() -> PipelineConfig {
        PipelineConfig {
            delay: Duration::from_millis(0),
            ..PipelineConfig::default()
        }
    }

    async fn feed(entries: Vec<FileEntry>) -> mpsc::Receiver<FileEntry> {
        let (tx, rx) = mpsc::channel(64);
        for e in entries {
            tx.send(e).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn downloads_and_records_entries() {
        let f = fixture(no_delay()).await;
        let rx = feed(vec![entry("a.pdf"), entry("b.pdf")]).await;

        let summary = f.pipeline.run(rx).await;
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.bytes, 4096);
        assert!(
            f.pipeline
                .cache
                .is_downloaded("https://www.justice.gov/epstein/files/a.pdf")
                .await
        );
    }

    #[tokio::test]
    async fn per_file_failures_do_not_abort_the_run() {
        let f = fixture(no_delay()).await;
        let rx = feed(vec![entry("a.pdf"), entry("bad.pdf"), entry("c.pdf")]).await;

        let summary = f.pipeline.run(rx).await;
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn already_downloaded_entries_are_skipped() {
        let f = fixture(no_delay()).await;
        let mut done = entry("a.pdf");
        done.downloaded = true;
        f.pipeline.cache.record_download(done).await;

        let rx = feed(vec![entry("a.pdf"), entry("b.pdf")]).await;
        let summary = f.pipeline.run(rx).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.downloaded, 1);
    }

    #[tokio::test]
    async fn dispatch_limit_bounds_fresh_downloads() {
        let f = fixture(PipelineConfig {
            limit: Some(2),
            ..no_delay()
        })
        .await;

        let rx = feed(vec![
            entry("a.pdf"),
            entry("b.pdf"),
            entry("c.pdf"),
            entry("d.pdf"),
        ])
        .await;
        let summary = f.pipeline.run(rx).await;
        assert_eq!(summary.downloaded, 2);
    }

    #[tokio::test]
    async fn pacing_holds_when_the_pool_is_saturated() {
        let f = fixture(PipelineConfig {
            delay: Duration::from_millis(60),
            concurrency: 2,
            ..PipelineConfig::default()
        })
        .await;
        // Two long transfers occupy both permits and finish together, so
        // the two queued entries would start back-to-back if pacing were
        // applied at dispatch instead of at transfer start.
        *f.server.stalls.lock().unwrap() =
            vec![Duration::from_millis(180), Duration::from_millis(240)];

        let rx = feed(vec![
            entry("stall-a.pdf"),
            entry("stall-b.pdf"),
            entry("c.pdf"),
            entry("d.pdf"),
        ])
        .await;
        f.pipeline.run(rx).await;

        let mut starts = f.server.starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(
                gap >= Duration::from_millis(40),
                "starts only {:?} apart",
                gap
            );
        }
    }

    #[tokio::test]
    async fn download_records_carry_duration_and_retries() {
        let f = fixture(no_delay()).await;
        let rx = feed(vec![entry("flaky.pdf")]).await;

        let summary = f.pipeline.run(rx).await;
        assert_eq!(summary.downloaded, 1);

        let Fixture {
            pipeline, recorder, _dir, ..
        } = f;
        drop(pipeline);
        let path = recorder.path().to_path_buf();
        recorder.shutdown().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let records: Vec<TraceRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let download = records
            .iter()
            .find(|r| r.action == TraceAction::FileDownload)
            .unwrap();
        assert_eq!(download.outcome, TraceOutcome::Success);
        assert!(download.duration_ms.is_some());
        assert_eq!(download.retry_count, Some(1));
    }

    #[tokio::test]
    async fn download_starts_respect_the_pacing_delay() {
        let f = fixture(PipelineConfig {
            delay: Duration::from_millis(50),
            ..PipelineConfig::default()
        })
        .await;

        let rx = feed(vec![entry("a.pdf"), entry("b.pdf"), entry("c.pdf")]).await;
        f.pipeline.run(rx).await;

        let starts = f.server.starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(
                gap >= Duration::from_millis(40),
                "starts only {:?} apart",
                gap
            );
        }
    }
}
