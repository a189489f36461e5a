//! Artifact download: `ArtifactReady -> Delivered`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::metrics::ARTIFACTS_FETCHED;
use crate::platform::{DocumentStore, PlatformError};
use crate::referral::{
    ArtifactRef, RecordKey, RecordStore, RecordUpdate, ReferralFilter, ReferralStatus,
    StoreError, TransitionOutcome,
};

use super::types::{FetchReport, PipelineContext};

/// Extension of delivered workbooks.
const ARTIFACT_EXTENSION: &str = "xlsx";

/// Per-record fetch errors. The record is left in `ArtifactReady`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("referral id {0:?} cannot be used as a file name")]
    InvalidFileName(String),

    #[error("download of {artifact} for {key} failed: {source}")]
    Download {
        key: RecordKey,
        artifact: ArtifactRef,
        #[source]
        source: PlatformError,
    },

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is missing after download")]
    Missing { path: PathBuf },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of fetching one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Written locally and the record moved to `Delivered`.
    Delivered(PathBuf),
    /// Record was no longer in `ArtifactReady`.
    Skipped(ReferralStatus),
}

/// Downloads finished workbooks into a local directory.
pub struct ArtifactFetcher {
    store: Arc<dyn RecordStore>,
    documents: Arc<dyn DocumentStore>,
}

impl ArtifactFetcher {
    pub fn new(ctx: &PipelineContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            documents: Arc::clone(&ctx.documents),
        }
    }

    /// Local file name for a referral's workbook.
    pub fn file_name(referral_id: &str) -> Result<String, FetchError> {
        let unsafe_name = referral_id.is_empty()
            || referral_id == "."
            || referral_id == ".."
            || referral_id
                .chars()
                .any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control());
        if unsafe_name {
            return Err(FetchError::InvalidFileName(referral_id.to_string()));
        }
        Ok(format!("{}.{}", referral_id, ARTIFACT_EXTENSION))
    }

    /// Download one artifact to `dest` and mark the record delivered.
    ///
    /// The status only changes once the file is confirmed on disk.
    pub async fn fetch_one(
        &self,
        key: &RecordKey,
        artifact: &ArtifactRef,
        dest: &Path,
    ) -> Result<FetchOutcome, FetchError> {
        let current = self
            .store
            .get(key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if current.status != ReferralStatus::ArtifactReady {
            return Ok(FetchOutcome::Skipped(current.status));
        }

        let path = dest.join(Self::file_name(&key.referral_id)?);

        let content = self
            .documents
            .read(artifact.as_str())
            .await
            .map_err(|source| FetchError::Download {
                key: key.clone(),
                artifact: artifact.clone(),
                source,
            })?;

        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|source| FetchError::Write {
                path: dest.to_path_buf(),
                source,
            })?;
        tokio::fs::write(&path, &content)
            .await
            .map_err(|source| FetchError::Write {
                path: path.clone(),
                source,
            })?;

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| FetchError::Write {
                path: path.clone(),
                source,
            })?;
        if !exists {
            return Err(FetchError::Missing { path });
        }

        match self.store.transition(
            key,
            ReferralStatus::ArtifactReady,
            ReferralStatus::Delivered,
            RecordUpdate::new().with_local_path(path.clone()),
        )? {
            TransitionOutcome::Applied(_) => {
                info!("Downloaded {} for referral {} to {}", artifact, key, path.display());
                Ok(FetchOutcome::Delivered(path))
            }
            TransitionOutcome::Stale { current } => Ok(FetchOutcome::Skipped(current)),
        }
    }

    /// Download every artifact in the mapping into `dest`.
    pub async fn fetch(
        &self,
        artifacts: &BTreeMap<RecordKey, ArtifactRef>,
        dest: &Path,
    ) -> Result<FetchReport, StoreError> {
        let mut report = FetchReport::default();

        for (key, artifact) in artifacts {
            match self.fetch_one(key, artifact, dest).await {
                Ok(FetchOutcome::Delivered(path)) => {
                    ARTIFACTS_FETCHED.with_label_values(&["delivered"]).inc();
                    report.delivered.insert(key.clone(), path);
                }
                Ok(FetchOutcome::Skipped(status)) => {
                    info!("Referral {} is {}; not downloading {}", key, status, artifact);
                    report.skipped.push(key.clone());
                }
                Err(FetchError::Store(e)) if e.is_fatal() => return Err(e),
                Err(e) => {
                    ARTIFACTS_FETCHED.with_label_values(&["failed"]).inc();
                    warn!("{}", e);
                    report.failures.push((key.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Download the artifact of every record in `ArtifactReady` (up to `limit`).
    pub async fn fetch_ready(&self, dest: &Path, limit: Option<usize>) -> Result<FetchReport, StoreError> {
        let records = self.store.list(
            &ReferralFilter::new()
                .with_status(ReferralStatus::ArtifactReady)
                .with_limit(limit),
        )?;

        let mut artifacts = BTreeMap::new();
        for record in records {
            match &record.artifact_id {
                Some(artifact) => {
                    artifacts.insert(record.key(), artifact.clone());
                }
                None => warn!(
                    "Referral {} is {} without an artifact; skipped",
                    record.referral_id, record.status
                ),
            }
        }
        self.fetch(&artifacts, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referral::SqliteRecordStore;
    use crate::testing::{fixtures, MockDocumentStore, MockJobService};
    use tempfile::TempDir;

    struct Harness {
        store: Arc<SqliteRecordStore>,
        documents: Arc<MockDocumentStore>,
        fetcher: ArtifactFetcher,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteRecordStore::in_memory().unwrap());
        let documents = Arc::new(MockDocumentStore::new());
        let ctx = PipelineContext::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::new(MockJobService::new()),
            Arc::clone(&documents) as Arc<dyn DocumentStore>,
        );
        Harness {
            store,
            documents,
            fetcher: ArtifactFetcher::new(&ctx),
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(ArtifactFetcher::file_name("R1").unwrap(), "R1.xlsx");
        assert!(ArtifactFetcher::file_name("").is_err());
        assert!(ArtifactFetcher::file_name("..").is_err());
        assert!(ArtifactFetcher::file_name("../R1").is_err());
        assert!(ArtifactFetcher::file_name("a\\b").is_err());
    }

    #[tokio::test]
    async fn test_fetch_writes_file_and_delivers() {
        let h = harness();
        let dir = TempDir::new().unwrap();
        let key = fixtures::ready_record(h.store.as_ref(), "R1", "file-F1", "job-1", "file-X1");
        h.documents.insert("file-X1", b"workbook bytes".to_vec()).await;

        let artifacts = BTreeMap::from([(key.clone(), ArtifactRef::new("file-X1"))]);
        let report = h.fetcher.fetch(&artifacts, dir.path()).await.unwrap();

        let expected = dir.path().join("R1.xlsx");
        assert_eq!(report.delivered.get(&key), Some(&expected));
        assert_eq!(std::fs::read(&expected).unwrap(), b"workbook bytes");
        let stored = h.store.get(&key).unwrap().unwrap();
        assert_eq!(stored.status, ReferralStatus::Delivered);
        assert_eq!(stored.local_path, Some(expected));
    }

    #[tokio::test]
    async fn test_fetch_creates_destination() {
        let h = harness();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested").join("out");
        fixtures::ready_record(h.store.as_ref(), "R1", "file-F1", "job-1", "file-X1");
        h.documents.insert("file-X1", b"xlsx".to_vec()).await;

        let report = h.fetcher.fetch_ready(&dest, None).await.unwrap();

        assert_eq!(report.delivered.len(), 1);
        assert!(dest.join("R1.xlsx").exists());
    }

    #[tokio::test]
    async fn test_download_failure_leaves_record_ready() {
        let h = harness();
        let dir = TempDir::new().unwrap();
        let key = fixtures::ready_record(h.store.as_ref(), "R1", "file-F1", "job-1", "file-X1");

        let report = h.fetcher.fetch_ready(dir.path(), None).await.unwrap();

        assert!(report.delivered.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(!dir.path().join("R1.xlsx").exists());
        let stored = h.store.get(&key).unwrap().unwrap();
        assert_eq!(stored.status, ReferralStatus::ArtifactReady);
        assert!(stored.local_path.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_leaves_record_ready() {
        let h = harness();
        let dir = TempDir::new().unwrap();
        // A regular file where the destination directory should be
        let dest = dir.path().join("out");
        std::fs::write(&dest, b"not a directory").unwrap();
        let key = fixtures::ready_record(h.store.as_ref(), "R1", "file-F1", "job-1", "file-X1");
        h.documents.insert("file-X1", b"xlsx".to_vec()).await;

        let report = h.fetcher.fetch_ready(&dest, None).await.unwrap();

        assert!(report.delivered.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, key);
        assert_eq!(h.documents.reads().await.len(), 1);
        let stored = h.store.get(&key).unwrap().unwrap();
        assert_eq!(stored.status, ReferralStatus::ArtifactReady);
        assert!(stored.local_path.is_none());
    }

    #[tokio::test]
    async fn test_delivered_record_is_skipped() {
        let h = harness();
        let dir = TempDir::new().unwrap();
        let key = fixtures::ready_record(h.store.as_ref(), "R1", "file-F1", "job-1", "file-X1");
        h.documents.insert("file-X1", b"xlsx".to_vec()).await;
        let artifacts = BTreeMap::from([(key.clone(), ArtifactRef::new("file-X1"))]);

        h.fetcher.fetch(&artifacts, dir.path()).await.unwrap();
        let second = h.fetcher.fetch(&artifacts, dir.path()).await.unwrap();

        assert_eq!(second.skipped, vec![key]);
        assert_eq!(h.documents.reads().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_referral_id_is_rejected() {
        let h = harness();
        let dir = TempDir::new().unwrap();
        let key = fixtures::ready_record(h.store.as_ref(), "../R1", "file-F1", "job-1", "file-X1");
        h.documents.insert("file-X1", b"xlsx".to_vec()).await;

        let artifacts = BTreeMap::from([(key.clone(), ArtifactRef::new("file-X1"))]);
        let report = h.fetcher.fetch(&artifacts, dir.path()).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(h.documents.reads().await.is_empty());
        assert_eq!(
            h.store.get(&key).unwrap().unwrap().status,
            ReferralStatus::ArtifactReady
        );
    }
}
