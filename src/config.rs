//! Configuration management
//!
//! Unified TOML-backed configuration with first-run initialization and
//! zero-config defaults. Precedence is defaults, then the config file,
//! then CLI flags (applied by the CLI layer).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{EngineConfig, PipelineConfig, RetryPolicy};
use crate::constants::{limits, logging, workers};
use crate::errors::{ConfigError, Result};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Storage locations
    pub storage: StorageConfigToml,
    /// Worker pool sizing
    pub workers: WorkersConfigToml,
    /// Download pacing and retry settings
    pub download: DownloadConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfigToml {
    /// Artifact output root (None = current directory)
    pub output_dir: Option<PathBuf>,
    /// Snapshot and trace directory (None = output_dir)
    pub cache_dir: Option<PathBuf>,
}

impl Default for StorageConfigToml {
    fn default() -> Self {
        Self {
            output_dir: None,
            cache_dir: None,
        }
    }
}

/// TOML-friendly worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfigToml {
    /// Concurrent dataset discoveries
    pub datasets: usize,
    /// Concurrent page fetches
    pub pages: usize,
    /// Concurrent file transfers
    pub downloads: usize,
}

impl Default for WorkersConfigToml {
    fn default() -> Self {
        Self {
            datasets: workers::DEFAULT_DATASET_WORKERS,
            pages: workers::DEFAULT_PAGE_WORKERS,
            downloads: workers::DEFAULT_DOWNLOAD_WORKERS,
        }
    }
}

/// TOML-friendly download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfigToml {
    /// Minimum delay between download starts (e.g. "2s", "500ms")
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Attempts per request, first try included
    pub max_attempts: u32,
    /// Base backoff delay (e.g. "1s")
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
}

impl Default for DownloadConfigToml {
    fn default() -> Self {
        Self {
            delay: limits::DEFAULT_DOWNLOAD_DELAY,
            max_attempts: limits::DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(limits::RETRY_BASE_DELAY_MS),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration with file-then-defaults precedence
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path }.into());
                }
                Some(path)
            }
            None => Self::find_config_file(),
        };

        match config_path {
            Some(path) => Self::load_from_file(&path).await,
            None => Ok(Self::default()),
        }
    }

    /// Create a default config file on first run, if none exists
    pub async fn initialize_first_run() -> Result<Option<PathBuf>> {
        let config_path = match Self::default_config_path() {
            Some(path) => path,
            None => return Ok(None),
        };

        if config_path.exists() {
            return Ok(Some(config_path));
        }

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ConfigError::Io)?;
        }

        let content = toml::to_string_pretty(&Self::default()).map_err(|e| {
            ConfigError::InvalidValue {
                field: "defaults".to_string(),
                value: String::new(),
                reason: e.to_string(),
            }
        })?;
        tokio::fs::write(&config_path, content)
            .await
            .map_err(ConfigError::Io)?;

        info!("Created default config at {}", config_path.display());
        Ok(Some(config_path))
    }

    /// Search standard locations for a config file
    fn find_config_file() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from("./doj-fetcher.toml"),
            PathBuf::from("./config.toml"),
        ];
        if let Some(default) = Self::default_config_path() {
            candidates.push(default);
        }

        for path in candidates {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }
        debug!("No config file found, using defaults");
        None
    }

    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("doj-fetcher").join("config.toml"))
    }

    async fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(ConfigError::Io)?;
        let config: AppConfig =
            toml::from_str(&content).map_err(ConfigError::InvalidFormat)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Retry schedule derived from the download section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.download.max_attempts.max(1),
            base_delay: self.download.backoff_base,
            ..RetryPolicy::default()
        }
    }

    /// Engine configuration with paths resolved against the current dir
    pub fn engine_config(&self) -> EngineConfig {
        let output_dir = self
            .storage
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let cache_dir = self
            .storage
            .cache_dir
            .clone()
            .unwrap_or_else(|| output_dir.clone());

        EngineConfig {
            cache_dir,
            output_dir,
            dataset_workers: self.workers.datasets.max(1),
            page_workers: self.workers.pages.max(1),
            refresh_boundaries: false,
            retry: self.retry_policy(),
            pipeline: PipelineConfig {
                delay: self.download.delay,
                concurrency: self.workers.downloads.max(1),
                limit: None,
                refresh: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.workers.pages, workers::DEFAULT_PAGE_WORKERS);
        assert_eq!(parsed.download.delay, limits::DEFAULT_DOWNLOAD_DELAY);
    }

    #[test]
    fn humantime_delays_parse() {
        let config: AppConfig = toml::from_str(
            r#"
            [download]
            delay = "500ms"
            max_attempts = 5
            backoff_base = "2s"
            "#,
        )
        .unwrap();
        assert_eq!(config.download.delay, Duration::from_millis(500));
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.retry_policy().base_delay, Duration::from_secs(2));
    }

    #[test]
    fn engine_config_clamps_worker_counts() {
        let mut config = AppConfig::default();
        config.workers.datasets = 0;
        let engine = config.engine_config();
        assert_eq!(engine.dataset_workers, 1);
    }
}
