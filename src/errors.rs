//! Error types for DOJ Fetcher
//!
//! Errors are grouped by component. The transient/fatal distinction that
//! drives retry behavior lives on [`FetchError::is_transient`]: transient
//! faults may be retried by the caller, everything else either terminates a
//! single work item or the whole run.

use std::path::PathBuf;

use thiserror::Error;

/// HTTP fetch errors produced by the archive client
///
/// The client classifies each raw outcome exactly once and never retries
/// internally; retry policy lives in [`crate::app::retry`].
#[derive(Error, Debug)]
pub enum FetchError {
    /// Request-level HTTP failure (connect reset, DNS, protocol)
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Request timed out
    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Server asked us to back off
    #[error("Rate limited by server (HTTP 429)")]
    RateLimited,

    /// Server-side failure
    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Resource permanently absent
    #[error("Resource not found: {url}")]
    NotFound { url: String },

    /// Access blocked by the archive's abuse protection
    #[error("Access blocked by server (HTTP {status})")]
    Blocked { status: u16 },

    /// Invalid URL
    #[error("Invalid URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Retries exhausted for a transiently failing request
    #[error("Maximum attempts ({max_attempts}) exhausted")]
    AttemptsExhausted { max_attempts: u32 },

    /// A fetch task could not be scheduled or was lost by its worker pool
    #[error("Worker task failed: {reason}")]
    TaskFailed { reason: String },
}

impl FetchError {
    /// Whether the fault is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. }
            | FetchError::RateLimited
            | FetchError::ServerError { .. } => true,
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Blocked { .. }
            | FetchError::NotFound { .. }
            | FetchError::InvalidUrl { .. }
            | FetchError::AttemptsExhausted { .. }
            | FetchError::TaskFailed { .. } => false,
        }
    }
}

/// Response cache and snapshot errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not accessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// Snapshot file could not be parsed
    #[error("Cache snapshot corrupted: {reason}")]
    SnapshotCorrupted { reason: String },

    /// JSON (de)serialization failure
    #[error("Cache snapshot serialization failed")]
    Json(#[from] serde_json::Error),

    /// I/O error reading or writing the snapshot
    #[error("Cache I/O error")]
    Io(#[from] std::io::Error),
}

/// Artifact storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error during artifact operations
    #[error("Artifact I/O error")]
    Io(#[from] std::io::Error),

    /// Temp file could not be promoted to its final path
    #[error("Atomic rename failed: {temp_path} -> {final_path}")]
    AtomicRenameFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
    },

    /// Downloaded bytes failed verification
    #[error("Invalid artifact {name}: {reason}")]
    InvalidArtifact { name: String, reason: String },
}

/// Trace recorder errors
#[derive(Error, Debug)]
pub enum TraceError {
    /// Recorder channel closed before the record was accepted
    #[error("Trace channel closed")]
    ChannelClosed,

    /// I/O error writing the trace file
    #[error("Trace file I/O error")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized
    #[error("Trace record serialization failed")]
    Json(#[from] serde_json::Error),
}

/// Worker pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// Pool no longer admits new tasks
    #[error("Worker pool '{name}' is closed")]
    Closed { name: String },
}

/// Configuration errors
///
/// These are the only errors that produce a non-zero exit code: per-file
/// failures are recorded and summarized instead.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// I/O error reading configuration
    #[error("Configuration I/O error")]
    Io(#[from] std::io::Error),
}

/// Top-level application error that can represent any component error
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Fetch(_) => "fetch",
            AppError::Cache(_) => "cache",
            AppError::Storage(_) => "storage",
            AppError::Trace(_) => "trace",
            AppError::Pool(_) => "pool",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Fetch result type alias
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Storage result type alias
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Pool result type alias
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Trace result type alias
pub type TraceResult<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout { seconds: 30 }.is_transient());
        assert!(FetchError::RateLimited.is_transient());
        assert!(FetchError::ServerError { status: 503 }.is_transient());
        assert!(!FetchError::Blocked { status: 403 }.is_transient());
        assert!(!FetchError::AttemptsExhausted { max_attempts: 3 }.is_transient());
        assert!(!FetchError::TaskFailed {
            reason: "pool closed".into()
        }
        .is_transient());
    }

    #[test]
    fn app_error_category() {
        let err = AppError::from(FetchError::RateLimited);
        assert_eq!(err.category(), "fetch");

        let err = AppError::generic("boom");
        assert_eq!(err.category(), "generic");
    }
}
