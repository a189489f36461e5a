//! Types shared by the pipeline stages.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::auth::{AuthError, Identity};
use crate::platform::{DocumentStore, JobService, JobState};
use crate::referral::{ArtifactRef, JobHandle, RecordKey, RecordStore, ReferralStatus, StoreError};

/// Collaborators handed to every stage.
///
/// One store connection and one platform session per run.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn RecordStore>,
    pub jobs: Arc<dyn JobService>,
    pub documents: Arc<dyn DocumentStore>,
}

impl PipelineContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        jobs: Arc<dyn JobService>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            store,
            jobs,
            documents,
        }
    }
}

/// Errors that abort a whole run.
///
/// Everything per-record is collected into the stage reports instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of checking uploaded documents.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Moved to `CheckPassed`.
    pub passed: Vec<RecordKey>,
    /// Moved to `CheckFailed`.
    pub mismatched: Vec<RecordKey>,
    /// Checked by someone else before our write; nothing written.
    pub already_checked: Vec<RecordKey>,
    /// Left in `Uploaded` for manual follow-up, with the reason.
    pub unresolved: Vec<(RecordKey, String)>,
}

/// Result of a launch pass that had eligible records.
#[derive(Debug, Clone, Default)]
pub struct LaunchReport {
    /// Every handle the monitor should poll: fresh submissions and live jobs kept.
    pub handles: BTreeMap<RecordKey, JobHandle>,
    /// Records a new job was submitted for.
    pub submitted: Vec<RecordKey>,
    /// Records whose existing live job was kept instead of re-submitting.
    pub reused: Vec<RecordKey>,
    /// Records left untouched, with the reason.
    pub failures: Vec<(RecordKey, String)>,
}

/// Outcome of a launch pass.
#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    /// No record was eligible; callers skip the wait and the monitor.
    NoWork,
    /// Eligible records were attempted.
    Launched(LaunchReport),
}

impl LaunchOutcome {
    pub fn is_no_work(&self) -> bool {
        matches!(self, LaunchOutcome::NoWork)
    }
}

/// Result of polling job handles.
#[derive(Debug, Clone, Default)]
pub struct MonitorReport {
    /// Records that reached `ArtifactReady` in this pass.
    pub ready: BTreeMap<RecordKey, ArtifactRef>,
    /// Jobs still running (or queued); records stay in `JobStarted`.
    pub waiting: Vec<(RecordKey, JobState)>,
    /// Jobs that failed; records stay in `JobStarted` and are re-launched later.
    pub failed: Vec<(RecordKey, JobHandle)>,
    /// Jobs reported done without the expected output; need manual inspection.
    pub missing_output: Vec<(RecordKey, JobHandle)>,
    /// Records that had already left `JobStarted`; nothing written.
    pub already_advanced: Vec<RecordKey>,
    /// Handles that are not the record's current job, with the stored one.
    pub superseded: Vec<(RecordKey, Option<JobHandle>)>,
    /// Records that could not be polled, with the reason.
    pub errors: Vec<(RecordKey, String)>,
}

/// Result of downloading artifacts.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Records moved to `Delivered`, with the local file.
    pub delivered: BTreeMap<RecordKey, PathBuf>,
    /// Records that were no longer in `ArtifactReady`.
    pub skipped: Vec<RecordKey>,
    /// Records left in `ArtifactReady`, with the reason.
    pub failures: Vec<(RecordKey, String)>,
}

/// Everything one batch run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub identity: Identity,
    pub verify: VerifyReport,
    /// `None` when no record was eligible for launch.
    pub launch: Option<LaunchReport>,
    /// `None` when the monitor was skipped.
    pub monitor: Option<MonitorReport>,
    /// `None` when fetching was not requested.
    pub fetch: Option<FetchReport>,
}

impl RunSummary {
    /// Log a one-screen summary of the run.
    pub fn log(&self) {
        info!(
            "Verify: {} passed, {} mismatched, {} unresolved",
            self.verify.passed.len(),
            self.verify.mismatched.len(),
            self.verify.unresolved.len()
        );
        match &self.launch {
            Some(launch) => info!(
                "Launch: {} submitted, {} kept, {} failed",
                launch.submitted.len(),
                launch.reused.len(),
                launch.failures.len()
            ),
            None => info!("Launch: no eligible records"),
        }
        if let Some(monitor) = &self.monitor {
            info!(
                "Monitor: {} ready, {} waiting, {} failed, {} missing output, {} errors",
                monitor.ready.len(),
                monitor.waiting.len(),
                monitor.failed.len(),
                monitor.missing_output.len(),
                monitor.errors.len()
            );
        }
        if let Some(fetch) = &self.fetch {
            info!(
                "Fetch: {} delivered, {} failed",
                fetch.delivered.len(),
                fetch.failures.len()
            );
        }
    }
}

/// Record counts per status.
#[derive(Debug, Clone)]
pub struct StatusCount {
    pub status: ReferralStatus,
    pub count: i64,
}
