//! Run-scoped response cache with single-flight semantics
//!
//! The cache is read-through and keyed by `(dataset, page)`. Concurrent
//! misses on the same key share one in-flight fetch instead of duplicating
//! the request. Failed fetches are never cached, so a later retry can
//! re-issue them. The cache is owned by the run context, not a global, which
//! keeps runs isolated and testable in parallel.
//!
//! Boundary results and the downloaded-file ledger are persisted to an
//! on-disk snapshot (`archive_cache.json`) so the next run can skip
//! re-probing known datasets and re-downloading materialized files.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::app::models::{FileEntry, PageResult};
use crate::app::trace::StatsSnapshot;
use crate::constants::files;
use crate::errors::{CacheResult, FetchResult};

/// Cache key for one listing page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub dataset: u32,
    pub page: u32,
}

impl PageKey {
    pub fn new(dataset: u32, page: u32) -> Self {
        Self { dataset, page }
    }
}

/// Hit/miss counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
}

type PageSlot = Arc<OnceCell<Arc<PageResult>>>;

/// Read-through page cache shared by all workers of one run
#[derive(Debug, Default)]
pub struct PageCache {
    slots: Mutex<HashMap<PageKey, PageSlot>>,
    boundaries: Mutex<HashMap<u32, u32>>,
    ledger: Mutex<HashMap<String, FileEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache primed with a previous run's snapshot
    pub async fn from_snapshot(snapshot: &CacheSnapshot) -> Self {
        let cache = Self::new();
        *cache.boundaries.lock().await = snapshot.boundaries.clone();
        *cache.ledger.lock().await = snapshot.files.clone();
        cache
    }

    /// Return the cached page or run `fetch` to populate it
    ///
    /// Single-flight: when several callers miss on the same key at once,
    /// exactly one executes `fetch`; the others await its result and count
    /// as hits. A failed fetch leaves the slot empty.
    pub async fn get_or_fetch<F, Fut>(&self, key: PageKey, fetch: F) -> FetchResult<Arc<PageResult>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<PageResult>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(key).or_default().clone()
        };

        if let Some(page) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(page.clone());
        }

        let mut fetched_here = false;
        let result = slot
            .get_or_try_init(|| {
                fetched_here = true;
                self.misses.fetch_add(1, Ordering::Relaxed);
                async move {
                    let page = fetch().await?;
                    Ok(Arc::new(page))
                }
            })
            .await;

        match result {
            Ok(page) => {
                if !fetched_here {
                    // Served from another caller's in-flight fetch.
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(page.clone())
            }
            Err(e) => {
                debug!("Fetch for {:?} failed, slot left empty: {}", key, e);
                Err(e)
            }
        }
    }

    /// Current hit/miss counters
    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Boundary recorded for a dataset, if any
    pub async fn known_boundary(&self, dataset: u32) -> Option<u32> {
        self.boundaries.lock().await.get(&dataset).copied()
    }

    /// Record a discovered boundary
    pub async fn record_boundary(&self, dataset: u32, last_page: u32) {
        self.boundaries.lock().await.insert(dataset, last_page);
    }

    /// Whether a file URL is already materialized according to the ledger
    pub async fn is_downloaded(&self, url: &str) -> bool {
        self.ledger
            .lock()
            .await
            .get(url)
            .map(|entry| entry.downloaded)
            .unwrap_or(false)
    }

    /// Record a completed download in the ledger
    pub async fn record_download(&self, entry: FileEntry) {
        self.ledger.lock().await.insert(entry.url.clone(), entry);
    }

    /// Number of files in the ledger marked downloaded
    pub async fn downloaded_count(&self) -> usize {
        self.ledger
            .lock()
            .await
            .values()
            .filter(|e| e.downloaded)
            .count()
    }

    /// Produce a snapshot of the persistent parts of the cache
    pub async fn snapshot(&self, previous: &CacheSnapshot, stats: Option<StatsSnapshot>) -> CacheSnapshot {
        CacheSnapshot {
            version: CacheSnapshot::CURRENT_VERSION.to_string(),
            created_at: previous.created_at,
            updated_at: Utc::now(),
            boundaries: self.boundaries.lock().await.clone(),
            files: self.ledger.lock().await.clone(),
            last_run: stats.or_else(|| previous.last_run.clone()),
        }
    }

    /// Drop the ledger and boundary memory (used by `clean`)
    pub async fn clear_persistent(&self) {
        self.boundaries.lock().await.clear();
        self.ledger.lock().await.clear();
    }
}

/// On-disk form of the cross-run cache state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Snapshot format version
    pub version: String,
    /// When the snapshot lineage was first created
    pub created_at: DateTime<Utc>,
    /// Last save time
    pub updated_at: DateTime<Utc>,
    /// Discovered boundary per dataset
    pub boundaries: HashMap<u32, u32>,
    /// Downloaded-file ledger keyed by source URL
    pub files: HashMap<String, FileEntry>,
    /// Counters from the most recent run, for `stats`
    pub last_run: Option<StatsSnapshot>,
}

impl Default for CacheSnapshot {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: Self::CURRENT_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            boundaries: HashMap::new(),
            files: HashMap::new(),
            last_run: None,
        }
    }
}

impl CacheSnapshot {
    pub const CURRENT_VERSION: &'static str = "1";

    /// Snapshot path inside a cache directory
    pub fn path_in(cache_dir: &Path) -> std::path::PathBuf {
        cache_dir.join(files::SNAPSHOT_FILE_NAME)
    }

    /// Load a snapshot, returning defaults when absent or unreadable
    ///
    /// A corrupted snapshot is logged and discarded rather than aborting
    /// the run; the boundary memory is reproducible from the archive.
    pub async fn load(cache_dir: &Path) -> CacheSnapshot {
        let path = Self::path_in(cache_dir);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => {
                debug!("No cache snapshot at {}, starting fresh", path.display());
                return CacheSnapshot::default();
            }
        };

        match serde_json::from_str::<CacheSnapshot>(&content) {
            Ok(snapshot) => {
                info!(
                    "Cache snapshot loaded: {} boundaries, {} files tracked",
                    snapshot.boundaries.len(),
                    snapshot.files.len()
                );
                snapshot
            }
            Err(e) => {
                warn!("Cache snapshot corrupted ({}), starting fresh", e);
                CacheSnapshot::default()
            }
        }
    }

    /// Save the snapshot atomically, rotating the previous file to `.bak`
    pub async fn save(&self, cache_dir: &Path) -> CacheResult<()> {
        tokio::fs::create_dir_all(cache_dir).await?;
        let path = Self::path_in(cache_dir);
        let backup = path.with_extension(format!(
            "json{}",
            files::BACKUP_FILE_SUFFIX
        ));
        let temp = path.with_extension(format!("json{}", files::TEMP_FILE_SUFFIX));

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::copy(&path, &backup).await;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &path).await?;

        debug!("Cache snapshot saved to {}", path.display());
        Ok(())
    }

    /// Remove the snapshot and its backup (used by `clean`)
    pub async fn remove(cache_dir: &Path) -> CacheResult<()> {
        let path = Self::path_in(cache_dir);
        let backup = path.with_extension(format!("json{}", files::BACKUP_FILE_SUFFIX));
        let _ = tokio::fs::remove_file(&path).await;
        let _ = tokio::fs::remove_file(&backup).await;
        Ok(())
    }
}
