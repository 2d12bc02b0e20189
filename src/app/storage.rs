//! Artifact storage
//!
//! Downloaded files land under `<output>/raw/data-set-{N}/`. Writes are
//! atomic (temp file then rename) so an interrupted run never leaves a
//! half-written PDF at a final path. Bytes are verified before they touch
//! disk: the PDF magic must be present and the payload must clear a minimum
//! size, which filters the HTML error pages the archive serves with a 200.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::app::models::FileEntry;
use crate::constants::files::{MIN_ARTIFACT_SIZE, PDF_MAGIC, RAW_SUBDIR, TEMP_FILE_SUFFIX};
use crate::errors::{StorageError, StorageResult};

/// Disk usage summary produced by `stats`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageUsage {
    /// Number of artifact files on disk
    pub file_count: u64,
    /// Total bytes across all artifacts
    pub total_bytes: u64,
    /// Number of dataset directories present
    pub dataset_count: u64,
}

/// Filesystem layout and write path for downloaded artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the artifact tree (`<output>/raw`)
    pub fn raw_root(&self) -> PathBuf {
        self.root.join(RAW_SUBDIR)
    }

    /// Directory for one dataset's artifacts
    pub fn dataset_dir(&self, dataset: u32) -> PathBuf {
        self.raw_root().join(format!("data-set-{}", dataset))
    }

    /// Final on-disk path for a file entry
    pub fn artifact_path(&self, entry: &FileEntry) -> PathBuf {
        self.dataset_dir(entry.dataset).join(&entry.file_name)
    }

    /// Whether a plausible artifact already exists at the entry's path
    pub async fn is_materialized(&self, entry: &FileEntry) -> bool {
        match tokio::fs::metadata(self.artifact_path(entry)).await {
            Ok(meta) => meta.is_file() && meta.len() >= MIN_ARTIFACT_SIZE,
            Err(_) => false,
        }
    }

    /// Reject bytes that are not a plausible PDF
    pub fn verify_bytes(name: &str, bytes: &[u8]) -> StorageResult<()> {
        if (bytes.len() as u64) < MIN_ARTIFACT_SIZE {
            return Err(StorageError::InvalidArtifact {
                name: name.to_string(),
                reason: format!("only {} bytes", bytes.len()),
            });
        }
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(StorageError::InvalidArtifact {
                name: name.to_string(),
                reason: "missing PDF header".to_string(),
            });
        }
        Ok(())
    }

    /// Verify and atomically persist an artifact, returning its path and
    /// md5 checksum
    pub async fn write_artifact(
        &self,
        entry: &FileEntry,
        bytes: &[u8],
    ) -> StorageResult<(PathBuf, String)> {
        Self::verify_bytes(&entry.file_name, bytes)?;

        let final_path = self.artifact_path(entry);
        let dir = final_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.raw_root());
        tokio::fs::create_dir_all(&dir).await?;

        let temp_path = final_path.with_file_name(format!(
            "{}{}",
            entry.file_name, TEMP_FILE_SUFFIX
        ));
        tokio::fs::write(&temp_path, bytes).await?;

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            warn!(
                "Rename failed for {}: {}",
                final_path.display(),
                e
            );
            return Err(StorageError::AtomicRenameFailed {
                temp_path,
                final_path,
            });
        }

        let checksum = format!("{:x}", md5::compute(bytes));
        debug!(
            "Stored {} ({} bytes, md5 {})",
            final_path.display(),
            bytes.len(),
            checksum
        );
        Ok((final_path, checksum))
    }

    /// Walk the artifact tree and total up what is on disk
    pub async fn usage(&self) -> StorageResult<StorageUsage> {
        let raw = self.raw_root();
        let mut usage = StorageUsage::default();

        let mut datasets = match tokio::fs::read_dir(&raw).await {
            Ok(rd) => rd,
            Err(_) => return Ok(usage),
        };

        while let Some(dataset_entry) = datasets.next_entry().await? {
            if !dataset_entry.file_type().await?.is_dir() {
                continue;
            }
            usage.dataset_count += 1;

            let mut files = tokio::fs::read_dir(dataset_entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let meta = file.metadata().await?;
                if meta.is_file() {
                    usage.file_count += 1;
                    usage.total_bytes += meta.len();
                }
            }
        }
        Ok(usage)
    }

    /// Delete the entire artifact tree
    pub async fn remove_all(&self) -> StorageResult<()> {
        let raw = self.raw_root();
        match tokio::fs::remove_dir_all(&raw).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use url::Url;

    fn entry(dataset: u32, name: &str) -> FileEntry {
        FileEntry::new(
            Url::parse(&format!("https://www.justice.gov/epstein/files/{}", name)).unwrap(),
            dataset,
            1,
        )
    }

    fn pdf_bytes() -> Vec<u8> {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(2048, b' ');
        bytes
    }

    #[tokio::test]
    async fn writes_verified_artifact_atomically() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let entry = entry(3, "exhibit.pdf");

        let (path, checksum) = store.write_artifact(&entry, &pdf_bytes()).await.unwrap();
        assert!(path.ends_with("raw/data-set-3/exhibit.pdf"));
        assert_eq!(checksum.len(), 32);
        assert!(store.is_materialized(&entry).await);

        // No temp file left behind.
        let mut names = Vec::new();
        let mut rd = tokio::fs::read_dir(store.dataset_dir(3)).await.unwrap();
        while let Some(e) = rd.next_entry().await.unwrap() {
            names.push(e.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("exhibit.pdf")]);
    }

    #[tokio::test]
    async fn rejects_non_pdf_payloads() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let entry = entry(1, "notes.pdf");

        let mut html = b"<html>Access Denied</html>".to_vec();
        html.resize(4096, b' ');
        let result = store.write_artifact(&entry, &html).await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidArtifact { .. })
        ));
        assert!(!store.is_materialized(&entry).await);
    }

    #[tokio::test]
    async fn rejects_undersized_payloads() {
        let result = ArtifactStore::verify_bytes("tiny.pdf", b"%PDF-1.7");
        assert!(matches!(result, Err(StorageError::InvalidArtifact { .. })));
    }

    #[tokio::test]
    async fn usage_totals_the_artifact_tree() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        store
            .write_artifact(&entry(1, "a.pdf"), &pdf_bytes())
            .await
            .unwrap();
        store
            .write_artifact(&entry(2, "b.pdf"), &pdf_bytes())
            .await
            .unwrap();

        let usage = store.usage().await.unwrap();
        assert_eq!(usage.dataset_count, 2);
        assert_eq!(usage.file_count, 2);
        assert_eq!(usage.total_bytes, 4096);

        store.remove_all().await.unwrap();
        assert_eq!(store.usage().await.unwrap(), StorageUsage::default());
    }
}
