//! Application constants for DOJ Fetcher
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Archive service URLs and endpoints
pub mod archive {
    /// DOJ archive base URL
    pub const BASE_URL: &str = "https://www.justice.gov";

    /// Path segment under which dataset listings live
    pub const DISCLOSURES_PATH: &str = "/epstein/doj-disclosures";

    /// Cookie the archive requires before serving listings
    pub const AGE_VERIFICATION_COOKIE: &str = "justiceGovAgeVerified=true";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 16;
}

/// Retry and politeness configuration
pub mod limits {
    use super::Duration;

    /// Maximum attempts for a transiently failing request (first try included)
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;

    /// Maximum backoff delay
    pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

    /// Jitter factor for randomizing backoff delays (0.0-1.0)
    pub const BACKOFF_JITTER_FACTOR: f64 = 0.1;

    /// Default minimum delay between download starts
    pub const DEFAULT_DOWNLOAD_DELAY: Duration = Duration::from_secs(2);
}

/// Worker and concurrency configuration
pub mod workers {
    /// Default number of concurrent dataset workers
    pub const DEFAULT_DATASET_WORKERS: usize = 4;

    /// Default number of concurrent page workers
    pub const DEFAULT_PAGE_WORKERS: usize = 8;

    /// Default number of concurrent file downloads
    pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;

    /// Channel buffer size for the enumeration -> pipeline stream
    pub const ENTRY_CHANNEL_BUFFER: usize = 256;

    /// Channel buffer size for trace record submission
    pub const TRACE_CHANNEL_BUFFER: usize = 1024;

    /// Poll interval while draining a worker pool
    pub const DRAIN_POLL_INTERVAL_MS: u64 = 25;
}

/// Boundary discovery configuration
pub mod discovery {
    /// Hard safety cap on probed page numbers
    pub const MAX_PROBE_PAGE: u32 = 65_536;

    /// Consecutive empty datasets before dataset-id scanning stops
    pub const DATASET_MISS_LIMIT: u32 = 5;

    /// Default dataset id to start scanning from
    pub const DATASET_SCAN_START: u32 = 1;
}

/// File and snapshot constants
pub mod files {
    /// Temporary file suffix for atomic writes
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Backup suffix for the cache snapshot
    pub const BACKUP_FILE_SUFFIX: &str = ".bak";

    /// On-disk cache snapshot file name
    pub const SNAPSHOT_FILE_NAME: &str = "archive_cache.json";

    /// Prefix for per-run trace files
    pub const TRACE_FILE_PREFIX: &str = "trace_";

    /// Subdirectory of the output root holding downloaded artifacts
    pub const RAW_SUBDIR: &str = "raw";

    /// Magic bytes every accepted artifact must start with
    pub const PDF_MAGIC: &[u8] = b"%PDF-";

    /// Minimum plausible artifact size in bytes
    pub const MIN_ARTIFACT_SIZE: u64 = 1024;

    /// Substrings that mark a link target as decoration rather than content
    pub const UNWANTED_NAME_FRAGMENTS: &[&str] =
        &["icon", "logo", "favicon", "button", "arrow", "small", "tiny"];
}

/// Logging constants
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

// Re-export commonly used constants for convenience
pub use archive::BASE_URL as ARCHIVE_BASE_URL;
pub use files::{SNAPSHOT_FILE_NAME, TEMP_FILE_SUFFIX};
pub use http::{DEFAULT_TIMEOUT as HTTP_TIMEOUT, USER_AGENT};
pub use limits::{DEFAULT_MAX_ATTEMPTS, RETRY_BASE_DELAY_MS};
pub use workers::{DEFAULT_DATASET_WORKERS, DEFAULT_PAGE_WORKERS};
