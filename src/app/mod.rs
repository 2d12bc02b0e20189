//! Core engine: discovery, caching, and the download pipeline

pub mod cache;
pub mod client;
pub mod coordinator;
pub mod discovery;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod storage;
pub mod trace;

pub use cache::{CacheSnapshot, PageCache, PageKey};
pub use client::{ArchiveClient, ClientConfig, PageFetch, PageFetcher};
pub use coordinator::{Coordinator, DatasetOutcome, EngineConfig, RunSummary};
pub use discovery::{BoundaryReport, DiscoveryEngine};
pub use models::{Dataset, DatasetSelector, DiscoveryState, FileEntry, PageResult};
pub use pipeline::{DownloadPipeline, PipelineConfig, PipelineSummary};
pub use pool::{PoolStatus, WorkerPool};
pub use retry::{retry_fetch, RetryPolicy};
pub use storage::{ArtifactStore, StorageUsage};
pub use trace::{RunStats, StatsSnapshot, TraceRecorder, TraceSender};
