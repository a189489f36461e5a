//! Record store trait and types.

use std::path::PathBuf;

use thiserror::Error;

use super::{ArtifactRef, JobHandle, RecordKey, ReferralRecord, ReferralStatus};

/// Error type for record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row with this key.
    #[error("referral not found: {} ({})", .0.referral_id, .0.input_document_id)]
    NotFound(RecordKey),

    /// A row with this key already exists.
    #[error("referral already registered: {} ({})", .0.referral_id, .0.input_document_id)]
    Duplicate(RecordKey),

    /// The requested status change is not an edge of the status graph.
    #[error("invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: RecordKey,
        from: ReferralStatus,
        to: ReferralStatus,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether the store itself is unusable, as opposed to one record being off.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Request to register a new referral in `Uploaded`.
#[derive(Debug, Clone)]
pub struct NewReferral {
    pub referral_id: String,
    pub input_document_id: String,
}

/// Optional fields written together with a status transition.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub job_handle: Option<JobHandle>,
    pub artifact_id: Option<ArtifactRef>,
    pub local_path: Option<PathBuf>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_handle(mut self, handle: JobHandle) -> Self {
        self.job_handle = Some(handle);
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifact_id = Some(artifact);
        self
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }
}

/// Result of a compare-and-set status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The row was still in the expected status and has been updated.
    Applied(ReferralRecord),
    /// The row had already moved to another status; nothing was written.
    Stale { current: ReferralStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Filter for querying referrals.
#[derive(Debug, Clone, Default)]
pub struct ReferralFilter {
    /// Statuses to include (empty = any).
    pub statuses: Vec<ReferralStatus>,
    /// Maximum number of results (None = unlimited).
    pub limit: Option<usize>,
}

impl ReferralFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by a single status.
    pub fn with_status(mut self, status: ReferralStatus) -> Self {
        self.statuses = vec![status];
        self
    }

    /// Filter by any of several statuses.
    pub fn with_statuses(mut self, statuses: &[ReferralStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// Trait for referral storage backends.
pub trait RecordStore: Send + Sync {
    /// Register a new referral in `Uploaded`.
    fn insert(&self, request: NewReferral) -> Result<ReferralRecord, StoreError>;

    /// Get a referral by key.
    fn get(&self, key: &RecordKey) -> Result<Option<ReferralRecord>, StoreError>;

    /// List referrals matching the filter, oldest first.
    fn list(&self, filter: &ReferralFilter) -> Result<Vec<ReferralRecord>, StoreError>;

    /// Count referrals in a status.
    fn count_by_status(&self, status: ReferralStatus) -> Result<i64, StoreError>;

    /// Move a referral from `from` to `to`, writing `update` alongside.
    ///
    /// Rejects pairs that are not edges of the status graph. Returns
    /// [`TransitionOutcome::Stale`] when the row is no longer in `from`.
    fn transition(
        &self,
        key: &RecordKey,
        from: ReferralStatus,
        to: ReferralStatus,
        update: RecordUpdate,
    ) -> Result<TransitionOutcome, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_update_builder() {
        let update = RecordUpdate::new()
            .with_job_handle(JobHandle::new("job-1"))
            .with_artifact(ArtifactRef::new("file-A1"))
            .with_local_path("/tmp/R1.xlsx");

        assert_eq!(update.job_handle, Some(JobHandle::new("job-1")));
        assert_eq!(update.artifact_id, Some(ArtifactRef::new("file-A1")));
        assert_eq!(update.local_path, Some(PathBuf::from("/tmp/R1.xlsx")));
    }

    #[test]
    fn test_only_database_errors_are_fatal() {
        assert!(StoreError::Database("gone".into()).is_fatal());
        assert!(!StoreError::NotFound(RecordKey::new("R1", "F1")).is_fatal());
    }

    #[test]
    fn test_filter_builder() {
        let filter = ReferralFilter::new()
            .with_statuses(&[ReferralStatus::CheckPassed, ReferralStatus::JobStarted])
            .with_limit(Some(5));
        assert_eq!(filter.statuses.len(), 2);
        assert_eq!(filter.limit, Some(5));
    }
}
