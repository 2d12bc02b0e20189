//! Data models for dataset discovery and file enumeration
//!
//! This module defines the core domain types (datasets, page results, file
//! entries) together with the listing-page link extractor. File identity is
//! the source URL: re-discovering a URL never duplicates work.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::files;

/// Discovery state of a dataset within one run
///
/// Once a dataset reaches `Bounded` its `last_known_page` is immutable for
/// the remainder of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryState {
    /// Nothing known about the dataset's extent
    Unknown,
    /// Probes are in flight
    Probing,
    /// Boundary established
    Bounded,
}

/// One logical collection of paginated listings on the archive
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Numeric dataset identifier as it appears in listing URLs
    pub id: u32,
    /// Current discovery state
    pub state: DiscoveryState,
    /// Highest page confirmed to contain content; `Some(0)` means empty
    pub last_known_page: Option<u32>,
    /// Fetched pages in page order
    pub pages: BTreeMap<u32, Arc<PageResult>>,
}

impl Dataset {
    /// Create a dataset in the `Unknown` state
    pub fn new(id: u32) -> Self {
        Self {
            id,
            state: DiscoveryState::Unknown,
            last_known_page: None,
            pages: BTreeMap::new(),
        }
    }

    /// Record the discovered boundary and mark the dataset bounded
    pub fn bound(&mut self, last_page: u32) {
        self.last_known_page = Some(last_page);
        self.state = DiscoveryState::Bounded;
    }

    /// Total files across all fetched pages
    pub fn file_count(&self) -> usize {
        self.pages.values().map(|p| p.files.len()).sum()
    }
}

/// Result of fetching one listing page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// Owning dataset id
    pub dataset: u32,
    /// Engine page number (1-based)
    pub page: u32,
    /// When the page was fetched
    pub fetched_at: DateTime<Utc>,
    /// File entries in document order
    pub files: Vec<FileEntry>,
    /// True iff the page yielded at least one listing
    pub valid: bool,
}

impl PageResult {
    /// Parse a listing page, extracting file links in document order
    pub fn from_html(html: &str, page_url: &Url, dataset: u32, page: u32) -> Self {
        let files = extract_file_links(html, page_url, dataset, page);
        let valid = !files.is_empty();
        Self {
            dataset,
            page,
            fetched_at: Utc::now(),
            files,
            valid,
        }
    }

    /// Result for a page the archive reported as absent
    pub fn empty(dataset: u32, page: u32) -> Self {
        Self {
            dataset,
            page,
            fetched_at: Utc::now(),
            files: Vec::new(),
            valid: false,
        }
    }
}

/// One discovered file on a listing page
///
/// Identity is `url`; `file_id` is a stable md5 digest of it used for
/// compact keys in traces and the snapshot ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute source URL
    pub url: String,
    /// Display name (basename of the URL path)
    pub file_name: String,
    /// Dataset the file was discovered in
    pub dataset: u32,
    /// Page the file was discovered on
    pub page: u32,
    /// Size in bytes, once known
    pub size: Option<u64>,
    /// Stable content identifier derived from the URL
    pub file_id: String,
    /// Whether the artifact has been materialized locally
    pub downloaded: bool,
    /// Local artifact path once materialized
    pub local_path: Option<PathBuf>,
    /// MD5 checksum of the stored artifact
    pub checksum: Option<String>,
    /// When the file was first discovered
    pub discovered_at: DateTime<Utc>,
}

impl FileEntry {
    /// Create a fresh, not-yet-downloaded entry
    pub fn new(url: Url, dataset: u32, page: u32) -> Self {
        let file_name = url
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or("unnamed.pdf")
            .to_string();
        let file_id = generate_file_id(url.as_str());
        Self {
            url: url.into(),
            file_name,
            dataset,
            page,
            size: None,
            file_id,
            downloaded: false,
            local_path: None,
            checksum: None,
            discovered_at: Utc::now(),
        }
    }
}

impl PartialEq for FileEntry {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for FileEntry {}

/// Stable identifier for a file URL
pub fn generate_file_id(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// Extract PDF file links from listing-page HTML
///
/// Relative links are resolved against `page_url`, decorative assets
/// (icons, logos, thumbnails) are filtered out, and duplicate URLs within
/// the page are collapsed while preserving document order.
pub fn extract_file_links(html: &str, page_url: &Url, dataset: u32, page: u32) -> Vec<FileEntry> {
    // The selector literal is valid; parse cannot fail at runtime.
    let selector = Selector::parse("a[href]").expect("static selector");
    let document = Html::parse_document(html);

    let mut seen: HashSet<String> = HashSet::new();
    let mut entries = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim().replace(' ', "%20");

        let Ok(resolved) = page_url.join(&href) else {
            continue;
        };

        let path = resolved.path().to_ascii_lowercase();
        if !path.ends_with(".pdf") {
            continue;
        }

        let name = resolved
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.is_empty()
            || files::UNWANTED_NAME_FRAGMENTS
                .iter()
                .any(|fragment| name.contains(fragment))
        {
            continue;
        }

        if seen.insert(resolved.to_string()) {
            entries.push(FileEntry::new(resolved, dataset, page));
        }
    }

    entries
}

/// Dataset selector from the command line: `N` or `N:startPage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSelector {
    /// Dataset id
    pub dataset: u32,
    /// First page to enumerate (1-based)
    pub start_page: u32,
}

impl DatasetSelector {
    /// Selector for a whole dataset starting at page 1
    pub fn from_id(dataset: u32) -> Self {
        Self {
            dataset,
            start_page: 1,
        }
    }
}

impl FromStr for DatasetSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (dataset, start_page) = match s.split_once(':') {
            Some((ds, sp)) => (ds, Some(sp)),
            None => (s, None),
        };

        let dataset: u32 = dataset
            .trim()
            .parse()
            .map_err(|_| format!("invalid dataset id: {s}"))?;
        if dataset == 0 {
            return Err("dataset ids start at 1".to_string());
        }

        let start_page = match start_page {
            Some(sp) => {
                let sp: u32 = sp
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid start page: {s}"))?;
                if sp == 0 {
                    return Err("pages start at 1".to_string());
                }
                sp
            }
            None => 1,
        };

        Ok(Self {
            dataset,
            start_page,
        })
    }
}

impl fmt::Display for DatasetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_page > 1 {
            write!(f, "{}:{}", self.dataset, self.start_page)
        } else {
            write!(f, "{}", self.dataset)
        }
    }
}
