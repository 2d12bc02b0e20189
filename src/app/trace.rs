//! Run tracing and counters
//!
//! Every significant action of a run (page fetches, boundary results, file
//! downloads, skips, retries) is appended as one JSON line to a per-run
//! trace file. Workers send records over a channel to a single writer task,
//! so the file never interleaves and workers never block on disk I/O beyond
//! channel backpressure. `RunStats` keeps the same events as cheap atomic
//! counters for the end-of-run summary.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::files::TRACE_FILE_PREFIX;
use crate::constants::workers::TRACE_CHANNEL_BUFFER;
use crate::errors::TraceResult;

/// Kind of action a trace record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    /// A listing page was probed for validity during boundary discovery
    PageProbe,
    /// A listing page was fetched for file enumeration
    PageFetch,
    /// A dataset's last valid page was established
    BoundaryFound,
    /// A dataset probe during dataset-set scanning
    DatasetScan,
    /// A file artifact download finished (or failed terminally)
    FileDownload,
    /// A file was skipped (already materialized or filtered)
    FileSkip,
    /// A transient failure triggered a retry
    Retry,
}

/// Result classification of a traced action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Success,
    Failure,
    Skipped,
}

/// One line of the run trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Wall-clock time of the event
    pub timestamp: DateTime<Utc>,
    pub action: TraceAction,
    pub outcome: TraceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Elapsed time of the action, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Retries consumed beyond the first attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Free-form context (error text, boundary value, skip reason)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TraceRecord {
    pub fn new(action: TraceAction, outcome: TraceOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            outcome,
            dataset: None,
            page: None,
            url: None,
            duration_ms: None,
            retry_count: None,
            detail: None,
        }
    }

    pub fn dataset(mut self, dataset: u32) -> Self {
        self.dataset = Some(dataset);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub fn retry_count(mut self, retries: u32) -> Self {
        self.retry_count = Some(retries);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Cloneable sending side of the trace channel
///
/// Records are best-effort: once the writer has shut down, further records
/// are logged and dropped rather than failing the worker.
#[derive(Debug, Clone)]
pub struct TraceSender {
    tx: mpsc::Sender<TraceRecord>,
}

impl TraceSender {
    pub async fn record(&self, record: TraceRecord) {
        if self.tx.send(record).await.is_err() {
            warn!("Trace writer stopped, record dropped");
        }
    }
}

/// Owner of the trace file and its writer task
#[derive(Debug)]
pub struct TraceRecorder {
    tx: mpsc::Sender<TraceRecord>,
    writer: JoinHandle<TraceResult<u64>>,
    path: PathBuf,
}

impl TraceRecorder {
    /// Open `trace_{run_id}.jsonl` in `dir` and start the writer task
    pub async fn create(dir: &Path, run_id: &str) -> TraceResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}{}.jsonl", TRACE_FILE_PREFIX, run_id));
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, mut rx) = mpsc::channel::<TraceRecord>(TRACE_CHANNEL_BUFFER);
        let writer = tokio::spawn(async move {
            let mut file = tokio::io::BufWriter::new(file);
            let mut written = 0u64;
            while let Some(record) = rx.recv().await {
                // Serialization of a plain record struct cannot fail; skip
                // the line rather than kill the writer if it somehow does.
                match serde_json::to_string(&record) {
                    Ok(line) => {
                        file.write_all(line.as_bytes()).await?;
                        file.write_all(b"\n").await?;
                        written += 1;
                    }
                    Err(e) => warn!("Unserializable trace record dropped: {}", e),
                }
            }
            file.flush().await?;
            Ok(written)
        });

        debug!("Trace file opened: {}", path.display());
        Ok(Self { tx, writer, path })
    }

    /// Sender handle for workers
    pub fn sender(&self) -> TraceSender {
        TraceSender {
            tx: self.tx.clone(),
        }
    }

    /// Path of the trace file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the channel and wait for the writer to flush
    pub async fn shutdown(self) -> TraceResult<u64> {
        drop(self.tx);
        match self.writer.await {
            Ok(result) => result,
            Err(e) => {
                warn!("Trace writer task panicked: {}", e);
                Ok(0)
            }
        }
    }
}

/// Atomic counters for one run
#[derive(Debug)]
pub struct RunStats {
    run_id: String,
    started_wall: DateTime<Utc>,
    started: Instant,
    pub pages_fetched: AtomicU64,
    pub cache_hits: AtomicU64,
    pub datasets_bounded: AtomicU64,
    pub datasets_failed: AtomicU64,
    pub files_discovered: AtomicU64,
    pub files_downloaded: AtomicU64,
    pub files_skipped: AtomicU64,
    pub files_failed: AtomicU64,
    pub bytes_downloaded: AtomicU64,
    pub retries: AtomicU64,
}

impl RunStats {
    pub fn new() -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            run_id: now.format("%Y%m%d_%H%M%S").to_string(),
            started_wall: now,
            started: Instant::now(),
            pages_fetched: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            datasets_bounded: AtomicU64::new(0),
            datasets_failed: AtomicU64::new(0),
            files_discovered: AtomicU64::new(0),
            files_downloaded: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Serializable snapshot of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            run_id: self.run_id.clone(),
            started_at: self.started_wall,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            datasets_bounded: self.datasets_bounded.load(Ordering::Relaxed),
            datasets_failed: self.datasets_failed.load(Ordering::Relaxed),
            files_discovered: self.files_discovered.load(Ordering::Relaxed),
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RunStats`], persisted in the cache snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub pages_fetched: u64,
    pub cache_hits: u64,
    pub datasets_bounded: u64,
    pub datasets_failed: u64,
    pub files_discovered: u64,
    pub files_downloaded: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub bytes_downloaded: u64,
    pub retries: u64,
}
