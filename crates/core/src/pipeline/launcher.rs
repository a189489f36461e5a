//! Job submission: `CheckPassed | JobStarted -> JobStarted`.

use std::sync::Arc;

use serde_json::Map;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{JobConfig, RelaunchPolicy};
use crate::metrics::JOBS_LAUNCHED;
use crate::platform::{object_link, JobService, JobState, PlatformError, SubmitJobRequest};
use crate::referral::{
    JobHandle, RecordKey, RecordStore, RecordUpdate, ReferralFilter, ReferralRecord,
    ReferralStatus, StoreError, TransitionOutcome,
};

use super::types::{LaunchOutcome, LaunchReport, PipelineContext};

/// Statuses a record may be launched from.
pub const LAUNCHABLE: [ReferralStatus; 2] =
    [ReferralStatus::CheckPassed, ReferralStatus::JobStarted];

/// Per-record launch errors. The record is left as it was.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{key} is {status}; not eligible for launch")]
    NotEligible {
        key: RecordKey,
        status: ReferralStatus,
    },

    #[error("could not check existing job {handle} for {key}: {source}")]
    Describe {
        key: RecordKey,
        handle: JobHandle,
        #[source]
        source: PlatformError,
    },

    #[error("job submission for {key} failed: {source}")]
    Submit {
        key: RecordKey,
        #[source]
        source: PlatformError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchAction {
    /// A new job was submitted and recorded.
    Submitted(JobHandle),
    /// The record's existing job is still good and was kept.
    Reused(JobHandle),
    /// A job was submitted but the record moved on meanwhile; the job is orphaned.
    Orphaned {
        handle: JobHandle,
        current: ReferralStatus,
    },
}

/// Submits one workbook job per eligible record.
pub struct JobLauncher {
    store: Arc<dyn RecordStore>,
    jobs: Arc<dyn JobService>,
    job: JobConfig,
    policy: RelaunchPolicy,
}

impl JobLauncher {
    pub fn new(ctx: &PipelineContext, job: JobConfig, policy: RelaunchPolicy) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            jobs: Arc::clone(&ctx.jobs),
            job,
            policy,
        }
    }

    /// Build the submission for one record.
    ///
    /// Static inputs are copied as configured; the input field is set to a
    /// link to the record's document, overriding any static value of that name.
    pub fn build_request(&self, record: &ReferralRecord) -> SubmitJobRequest {
        let mut input: Map<String, serde_json::Value> = self
            .job
            .inputs
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        input.insert(
            self.job.input_field.clone(),
            object_link(&record.input_document_id, self.job.input_project.as_deref()),
        );

        SubmitJobRequest {
            executable_id: self.job.executable_id.clone(),
            name: format!("{}_{}", self.job.name_prefix, record.referral_id),
            project: self.job.output_project.clone(),
            input,
            input_document_id: record.input_document_id.clone(),
        }
    }

    /// Launch (or keep) the job for one record.
    pub async fn launch_one(&self, record: &ReferralRecord) -> Result<LaunchAction, LaunchError> {
        let key = record.key();
        if !LAUNCHABLE.contains(&record.status) {
            return Err(LaunchError::NotEligible {
                key,
                status: record.status,
            });
        }

        if let Some(existing) = self.reusable_job(record).await? {
            return Ok(LaunchAction::Reused(existing));
        }

        let handle = self
            .jobs
            .submit(self.build_request(record))
            .await
            .map_err(|source| LaunchError::Submit {
                key: key.clone(),
                source,
            })?;

        match self.store.transition(
            &key,
            record.status,
            ReferralStatus::JobStarted,
            RecordUpdate::new().with_job_handle(handle.clone()),
        )? {
            TransitionOutcome::Applied(_) => {
                info!(
                    "Started job {} for referral {} ({})",
                    handle, record.referral_id, record.input_document_id
                );
                Ok(LaunchAction::Submitted(handle))
            }
            TransitionOutcome::Stale { current } => {
                warn!(
                    "Referral {} moved to {} while job {} was submitted; job is orphaned",
                    record.referral_id, current, handle
                );
                Ok(LaunchAction::Orphaned { handle, current })
            }
        }
    }

    /// Under `check_live`, return the record's existing job if it is still
    /// running or already done.
    async fn reusable_job(&self, record: &ReferralRecord) -> Result<Option<JobHandle>, LaunchError> {
        if self.policy != RelaunchPolicy::CheckLive || record.status != ReferralStatus::JobStarted {
            return Ok(None);
        }
        let Some(handle) = &record.job_handle else {
            return Ok(None);
        };

        match self.jobs.describe(handle).await {
            Ok(desc) => match desc.state {
                JobState::Failed => {
                    info!(
                        "Previous job {} for referral {} failed; re-launching",
                        handle, record.referral_id
                    );
                    Ok(None)
                }
                state => {
                    debug!(
                        "Keeping job {} for referral {} ({})",
                        handle,
                        record.referral_id,
                        state.as_str()
                    );
                    Ok(Some(handle.clone()))
                }
            },
            Err(PlatformError::NotFound(_)) => {
                info!(
                    "Previous job {} for referral {} no longer exists; re-launching",
                    handle, record.referral_id
                );
                Ok(None)
            }
            Err(source) => Err(LaunchError::Describe {
                key: record.key(),
                handle: handle.clone(),
                source,
            }),
        }
    }

    /// Launch jobs for the given records.
    ///
    /// Returns [`LaunchOutcome::NoWork`] for an empty list. Per-record
    /// failures are collected; only a failing store aborts.
    pub async fn launch(&self, records: &[ReferralRecord]) -> Result<LaunchOutcome, StoreError> {
        if records.is_empty() {
            info!(
                "No records in {} or {}; no jobs to launch",
                ReferralStatus::CheckPassed,
                ReferralStatus::JobStarted
            );
            return Ok(LaunchOutcome::NoWork);
        }

        let mut report = LaunchReport::default();
        for record in records {
            let key = record.key();
            match self.launch_one(record).await {
                Ok(LaunchAction::Submitted(handle)) => {
                    JOBS_LAUNCHED.with_label_values(&["submitted"]).inc();
                    report.submitted.push(key.clone());
                    report.handles.insert(key, handle);
                }
                Ok(LaunchAction::Reused(handle)) => {
                    JOBS_LAUNCHED.with_label_values(&["reused"]).inc();
                    report.reused.push(key.clone());
                    report.handles.insert(key, handle);
                }
                Ok(LaunchAction::Orphaned { handle, current }) => {
                    JOBS_LAUNCHED.with_label_values(&["failed"]).inc();
                    report.failures.push((
                        key,
                        format!("record moved to {} after job {} was submitted", current, handle),
                    ));
                }
                Err(LaunchError::Store(e)) if e.is_fatal() => return Err(e),
                Err(e) => {
                    JOBS_LAUNCHED.with_label_values(&["failed"]).inc();
                    warn!("{}", e);
                    report.failures.push((key, e.to_string()));
                }
            }
        }

        info!(
            "Launched {} jobs ({} kept, {} failed)",
            report.submitted.len(),
            report.reused.len(),
            report.failures.len()
        );
        Ok(LaunchOutcome::Launched(report))
    }

    /// Launch jobs for every eligible record in the store (up to `limit`).
    pub async fn launch_eligible(&self, limit: Option<usize>) -> Result<LaunchOutcome, StoreError> {
        let records = self.store.list(
            &ReferralFilter::new()
                .with_statuses(&LAUNCHABLE)
                .with_limit(limit),
        )?;
        self.launch(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referral::{NewReferral, SqliteRecordStore};
    use crate::testing::{fixtures, MockDocumentStore, MockJobService};
    use serde_json::json;

    struct Harness {
        store: Arc<SqliteRecordStore>,
        jobs: Arc<MockJobService>,
        launcher: JobLauncher,
    }

    fn harness(policy: RelaunchPolicy) -> Harness {
        let store = Arc::new(SqliteRecordStore::in_memory().unwrap());
        let jobs = Arc::new(MockJobService::new());
        let ctx = PipelineContext::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&jobs) as Arc<dyn JobService>,
            Arc::new(MockDocumentStore::new()),
        );
        let launcher = JobLauncher::new(&ctx, fixtures::job_config(), policy);
        Harness {
            store,
            jobs,
            launcher,
        }
    }

    fn passed(store: &SqliteRecordStore, referral_id: &str, document_id: &str) -> ReferralRecord {
        let record = store
            .insert(NewReferral {
                referral_id: referral_id.to_string(),
                input_document_id: document_id.to_string(),
            })
            .unwrap();
        match store
            .transition(
                &record.key(),
                ReferralStatus::Uploaded,
                ReferralStatus::CheckPassed,
                RecordUpdate::new(),
            )
            .unwrap()
        {
            TransitionOutcome::Applied(record) => record,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn started(store: &SqliteRecordStore, referral_id: &str, document_id: &str, handle: &str) -> ReferralRecord {
        let record = passed(store, referral_id, document_id);
        match store
            .transition(
                &record.key(),
                ReferralStatus::CheckPassed,
                ReferralStatus::JobStarted,
                RecordUpdate::new().with_job_handle(JobHandle::new(handle)),
            )
            .unwrap()
        {
            TransitionOutcome::Applied(record) => record,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_build_request_merges_static_inputs() {
        let h = harness(RelaunchPolicy::CheckLive);
        let record = passed(&h.store, "R1", "file-F1");

        let request = h.launcher.build_request(&record);

        assert_eq!(request.executable_id, "app-workbook");
        assert_eq!(request.project, "project-out");
        assert_eq!(request.name, "eggd_generate_rd_variant_workbook_R1");
        assert_eq!(request.input_document_id, "file-F1");
        assert_eq!(
            request.input["json"],
            json!({"$dnanexus_link": {"project": "project-in", "id": "file-F1"}})
        );
        assert_eq!(
            request.input["refseq_tsv"],
            json!({"$dnanexus_link": "file-refseq"})
        );
    }

    #[tokio::test]
    async fn test_launch_submits_and_records_handle() {
        let h = harness(RelaunchPolicy::CheckLive);
        let record = passed(&h.store, "R1", "file-F1");

        let outcome = h.launcher.launch(&[record.clone()]).await.unwrap();

        let LaunchOutcome::Launched(report) = outcome else {
            panic!("expected a launch");
        };
        assert_eq!(report.submitted, vec![record.key()]);
        let handle = report.handles.get(&record.key()).unwrap();

        let stored = h.store.get(&record.key()).unwrap().unwrap();
        assert_eq!(stored.status, ReferralStatus::JobStarted);
        assert_eq!(stored.job_handle.as_ref(), Some(handle));
        assert_eq!(h.jobs.submitted_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_launch_empty_is_no_work() {
        let h = harness(RelaunchPolicy::CheckLive);
        let outcome = h.launcher.launch(&[]).await.unwrap();
        assert!(outcome.is_no_work());
        assert!(h.jobs.submitted_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_launch_eligible_with_nothing_eligible_is_no_work() {
        let h = harness(RelaunchPolicy::CheckLive);
        h.store
            .insert(NewReferral {
                referral_id: "R1".to_string(),
                input_document_id: "file-F1".to_string(),
            })
            .unwrap();

        let outcome = h.launcher.launch_eligible(None).await.unwrap();
        assert!(outcome.is_no_work());
    }

    #[tokio::test]
    async fn test_submit_failure_leaves_record_untouched() {
        let h = harness(RelaunchPolicy::CheckLive);
        let record = passed(&h.store, "R1", "file-F1");
        h.jobs
            .set_next_error(PlatformError::ApiError("quota exceeded".into()))
            .await;

        let outcome = h.launcher.launch(&[record.clone()]).await.unwrap();

        let LaunchOutcome::Launched(report) = outcome else {
            panic!("expected a launch");
        };
        assert!(report.handles.is_empty());
        assert_eq!(report.failures.len(), 1);
        let stored = h.store.get(&record.key()).unwrap().unwrap();
        assert_eq!(stored.status, ReferralStatus::CheckPassed);
        assert!(stored.job_handle.is_none());
    }

    #[tokio::test]
    async fn test_check_live_keeps_running_job() {
        let h = harness(RelaunchPolicy::CheckLive);
        h.jobs.add_job("job-live", "running", None).await;
        let record = started(&h.store, "R1", "file-F1", "job-live");

        let action = h.launcher.launch_one(&record).await.unwrap();

        assert_eq!(action, LaunchAction::Reused(JobHandle::new("job-live")));
        assert!(h.jobs.submitted_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_check_live_relaunches_failed_job() {
        let h = harness(RelaunchPolicy::CheckLive);
        h.jobs.add_job("job-old", "failed", None).await;
        let record = started(&h.store, "R1", "file-F1", "job-old");

        let action = h.launcher.launch_one(&record).await.unwrap();

        let LaunchAction::Submitted(handle) = action else {
            panic!("expected a new submission");
        };
        assert_ne!(handle, JobHandle::new("job-old"));
        let stored = h.store.get(&record.key()).unwrap().unwrap();
        assert_eq!(stored.job_handle, Some(handle));
        assert_eq!(stored.status, ReferralStatus::JobStarted);
    }

    #[tokio::test]
    async fn test_check_live_relaunches_missing_job() {
        let h = harness(RelaunchPolicy::CheckLive);
        let record = started(&h.store, "R1", "file-F1", "job-gone");

        let action = h.launcher.launch_one(&record).await.unwrap();

        assert!(matches!(action, LaunchAction::Submitted(_)));
    }

    #[tokio::test]
    async fn test_always_policy_resubmits_live_job() {
        let h = harness(RelaunchPolicy::Always);
        h.jobs.add_job("job-live", "running", None).await;
        let record = started(&h.store, "R1", "file-F1", "job-live");

        let action = h.launcher.launch_one(&record).await.unwrap();

        let LaunchAction::Submitted(handle) = action else {
            panic!("expected a new submission");
        };
        let stored = h.store.get(&record.key()).unwrap().unwrap();
        assert_eq!(stored.job_handle, Some(handle));
        assert_eq!(h.jobs.submitted_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_record_reports_orphaned_job() {
        let h = harness(RelaunchPolicy::CheckLive);
        let record = passed(&h.store, "R1", "file-F1");
        // Another run launches first
        h.store
            .transition(
                &record.key(),
                ReferralStatus::CheckPassed,
                ReferralStatus::JobStarted,
                RecordUpdate::new().with_job_handle(JobHandle::new("job-other")),
            )
            .unwrap();

        let action = h.launcher.launch_one(&record).await.unwrap();

        assert!(matches!(action, LaunchAction::Orphaned { .. }));
        let stored = h.store.get(&record.key()).unwrap().unwrap();
        assert_eq!(stored.job_handle, Some(JobHandle::new("job-other")));
    }

    #[tokio::test]
    async fn test_ineligible_record_rejected() {
        let h = harness(RelaunchPolicy::CheckLive);
        let record = h
            .store
            .insert(NewReferral {
                referral_id: "R1".to_string(),
                input_document_id: "file-F1".to_string(),
            })
            .unwrap();

        let result = h.launcher.launch_one(&record).await;
        assert!(matches!(result, Err(LaunchError::NotEligible { .. })));
    }
}
