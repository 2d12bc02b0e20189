//! HTTP client for the DOJ disclosures archive
//!
//! The client issues exactly one round trip per call and classifies the raw
//! outcome into content, an empty-page signal, or a transient/fatal fault.
//! It never retries internally; retry policy is applied by callers through
//! [`crate::app::retry`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::constants::{archive, http};
use crate::errors::{FetchError, FetchResult};

/// Outcome of fetching one listing page
#[derive(Debug, Clone)]
pub enum PageFetch {
    /// The page exists; payload is the raw HTML
    Content(String),
    /// The archive explicitly reported no content (terminal for discovery)
    Empty,
}

/// Seam between the engine and the network
///
/// Discovery and the download pipeline are generic over this trait so tests
/// can substitute a synthetic responder for the real archive.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    /// Fetch one listing page of a dataset (engine page numbers are 1-based)
    async fn fetch_page(&self, dataset: u32, page: u32) -> FetchResult<PageFetch>;

    /// Fetch one file's bytes
    async fn fetch_file(&self, url: &str) -> FetchResult<Vec<u8>>;
}

/// Listing URL for a dataset page under a given base
///
/// The remote pager is zero-based with the first page at the bare URL, so
/// engine page 1 maps to no query parameter and page `p > 1` to `?page={p-1}`.
pub fn listing_url(base: &Url, dataset: u32, page: u32) -> Url {
    let path = format!("{}/data-set-{}-files", archive::DISCLOSURES_PATH, dataset);
    let mut url = base.clone();
    url.set_path(&path);
    if page > 1 {
        url.set_query(Some(&format!("page={}", page - 1)));
    }
    url
}

/// Configuration for the archive HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Duration,
    /// Maximum connections per host
    pub pool_max_per_host: usize,
    /// Archive base URL
    pub base_url: Url,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            pool_idle_timeout: http::POOL_IDLE_TIMEOUT,
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            base_url: Url::parse(archive::BASE_URL).expect("base URL is valid"),
        }
    }
}

/// HTTP client for the DOJ archive
#[derive(Debug)]
pub struct ArchiveClient {
    client: Client,
    base_url: Url,
}

impl ArchiveClient {
    /// Create a client with default configuration
    pub fn new() -> FetchResult<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a client with custom configuration
    pub fn with_config(config: ClientConfig) -> FetchResult<Self> {
        let mut headers = HeaderMap::new();
        // The archive refuses listing pages until the age gate is accepted.
        headers.insert(
            COOKIE,
            HeaderValue::from_static(archive::AGE_VERIFICATION_COOKIE),
        );

        let client = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_per_host)
            .user_agent(http::USER_AGENT)
            .build()
            .map_err(FetchError::Http)?;

        tracing::debug!("Created archive client for {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url,
        })
    }

    /// Listing URL for a dataset page
    pub fn page_url(&self, dataset: u32, page: u32) -> Url {
        listing_url(&self.base_url, dataset, page)
    }

    /// Archive base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Classify a response status into a fetch outcome
    fn classify_status(status: StatusCode) -> Option<FetchError> {
        match status.as_u16() {
            429 => Some(FetchError::RateLimited),
            401 | 403 => Some(FetchError::Blocked {
                status: status.as_u16(),
            }),
            s if status.is_server_error() => Some(FetchError::ServerError { status: s }),
            _ => None,
        }
    }

    fn map_request_error(e: reqwest::Error, timeout: Duration) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                seconds: timeout.as_secs(),
            }
        } else {
            FetchError::Http(e)
        }
    }
}

#[async_trait]
impl PageFetcher for ArchiveClient {
    async fn fetch_page(&self, dataset: u32, page: u32) -> FetchResult<PageFetch> {
        let url = self.page_url(dataset, page);
        tracing::debug!("Fetching listing page {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Self::map_request_error(e, http::DEFAULT_TIMEOUT))?;

        let status = response.status();
        if matches!(status.as_u16(), 404 | 410) {
            return Ok(PageFetch::Empty);
        }
        if let Some(err) = Self::classify_status(status) {
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::map_request_error(e, http::DEFAULT_TIMEOUT))?;
        Ok(PageFetch::Content(body))
    }

    async fn fetch_file(&self, url: &str) -> FetchResult<Vec<u8>> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!("Downloading {}", parsed);

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| Self::map_request_error(e, http::DEFAULT_TIMEOUT))?;

        let status = response.status();
        if matches!(status.as_u16(), 404 | 410) {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if let Some(err) = Self::classify_status(status) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(FetchError::ServerError {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::map_request_error(e, http::DEFAULT_TIMEOUT))?;
        Ok(bytes.to_vec())
    }
}
