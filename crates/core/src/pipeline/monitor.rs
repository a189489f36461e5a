//! Job polling: `JobStarted -> ArtifactReady`, plus lookups by input document.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{JobConfig, LookupConfig};
use crate::metrics::JOBS_POLLED;
use crate::platform::{FindExecutionsQuery, JobDescription, JobService, JobState, PlatformError};
use crate::referral::{
    ArtifactRef, JobHandle, RecordKey, RecordStore, RecordUpdate, ReferralFilter,
    ReferralStatus, StoreError, TransitionOutcome,
};

use super::types::{MonitorReport, PipelineContext};

/// Per-record polling errors. The record is left in `JobStarted`.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("could not describe job {handle} for {key}: {source}")]
    Describe {
        key: RecordKey,
        handle: JobHandle,
        #[source]
        source: PlatformError,
    },

    #[error("job {handle} for {key} is done but has no output artifact")]
    MissingOutput { key: RecordKey, handle: JobHandle },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from looking up a job by its input document.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no done job found for input {0}")]
    NotFound(String),

    #[error("{count} done jobs found for input {document}: {}", .handles.join(", "))]
    Ambiguous {
        document: String,
        count: usize,
        handles: Vec<String>,
    },

    #[error("execution search failed: {0}")]
    Platform(#[from] PlatformError),
}

/// Result of polling one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Job done; record moved to `ArtifactReady`.
    Ready(ArtifactRef),
    /// Job not finished yet.
    Waiting(JobState),
    /// Job failed; the launcher picks the record up again.
    Failed,
    /// Record is no longer in `JobStarted`; nothing written.
    AlreadyAdvanced(ReferralStatus),
    /// Handle is not the record's current job (the stored one is given);
    /// nothing written.
    Superseded(Option<JobHandle>),
}

/// Polls submitted jobs and records their artifacts.
pub struct JobMonitor {
    store: Arc<dyn RecordStore>,
    jobs: Arc<dyn JobService>,
    job: JobConfig,
    lookup: LookupConfig,
}

impl JobMonitor {
    pub fn new(ctx: &PipelineContext, job: JobConfig, lookup: LookupConfig) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            jobs: Arc::clone(&ctx.jobs),
            job,
            lookup,
        }
    }

    /// Poll one job and advance its record if the job is done.
    ///
    /// Safe to repeat: a record that already left `JobStarted` is not
    /// touched and its job is not described again. Only the record's
    /// stored job can advance it.
    pub async fn poll(&self, key: &RecordKey, handle: &JobHandle) -> Result<PollOutcome, MonitorError> {
        let current = self
            .store
            .get(key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if current.status != ReferralStatus::JobStarted {
            debug!("Referral {} already {}; not polling {}", key, current.status, handle);
            return Ok(PollOutcome::AlreadyAdvanced(current.status));
        }
        if current.job_handle.as_ref() != Some(handle) {
            warn!(
                "Job {} is not the current job of referral {} ({}); not recorded",
                handle,
                key,
                current
                    .job_handle
                    .as_ref()
                    .map_or_else(|| "none".to_string(), ToString::to_string)
            );
            return Ok(PollOutcome::Superseded(current.job_handle));
        }

        let desc = self
            .jobs
            .describe(handle)
            .await
            .map_err(|source| MonitorError::Describe {
                key: key.clone(),
                handle: handle.clone(),
                source,
            })?;

        match desc.state {
            JobState::Done => {
                let artifact = desc.artifact.ok_or_else(|| MonitorError::MissingOutput {
                    key: key.clone(),
                    handle: handle.clone(),
                })?;

                match self.store.transition(
                    key,
                    ReferralStatus::JobStarted,
                    ReferralStatus::ArtifactReady,
                    RecordUpdate::new().with_artifact(artifact.clone()),
                )? {
                    TransitionOutcome::Applied(_) => {
                        info!("Job {} for referral {} done; artifact {}", handle, key, artifact);
                        Ok(PollOutcome::Ready(artifact))
                    }
                    TransitionOutcome::Stale { current } => {
                        Ok(PollOutcome::AlreadyAdvanced(current))
                    }
                }
            }
            JobState::Failed => {
                warn!("Job {} for referral {} failed; will be re-launched", handle, key);
                Ok(PollOutcome::Failed)
            }
            state => {
                debug!("Job {} for referral {} is {}", handle, key, state.as_str());
                Ok(PollOutcome::Waiting(state))
            }
        }
    }

    /// Poll every handle in the mapping.
    ///
    /// Per-record problems are collected; only a failing store aborts.
    pub async fn monitor(
        &self,
        handles: &BTreeMap<RecordKey, JobHandle>,
    ) -> Result<MonitorReport, StoreError> {
        let mut report = MonitorReport::default();

        for (key, handle) in handles {
            match self.poll(key, handle).await {
                Ok(PollOutcome::Ready(artifact)) => {
                    JOBS_POLLED.with_label_values(&["done"]).inc();
                    report.ready.insert(key.clone(), artifact);
                }
                Ok(PollOutcome::Waiting(state)) => {
                    JOBS_POLLED.with_label_values(&["pending"]).inc();
                    report.waiting.push((key.clone(), state));
                }
                Ok(PollOutcome::Failed) => {
                    JOBS_POLLED.with_label_values(&["failed"]).inc();
                    report.failed.push((key.clone(), handle.clone()));
                }
                Ok(PollOutcome::AlreadyAdvanced(_)) => {
                    report.already_advanced.push(key.clone());
                }
                Ok(PollOutcome::Superseded(current)) => {
                    report.superseded.push((key.clone(), current));
                }
                Err(MonitorError::MissingOutput { key, handle }) => {
                    JOBS_POLLED.with_label_values(&["missing_output"]).inc();
                    warn!(
                        "Job {} for referral {} is done but has no output; check it manually",
                        handle, key
                    );
                    report.missing_output.push((key, handle));
                }
                Err(MonitorError::Store(e)) if e.is_fatal() => return Err(e),
                Err(e) => {
                    JOBS_POLLED.with_label_values(&["error"]).inc();
                    warn!("{}", e);
                    report.errors.push((key.clone(), e.to_string()));
                }
            }
        }

        info!(
            "{} artifacts ready, {} jobs still running",
            report.ready.len(),
            report.waiting.len()
        );
        Ok(report)
    }

    /// Poll the recorded job of every record in `JobStarted` (up to `limit`).
    pub async fn monitor_started(&self, limit: Option<usize>) -> Result<MonitorReport, StoreError> {
        let records = self.store.list(
            &ReferralFilter::new()
                .with_status(ReferralStatus::JobStarted)
                .with_limit(limit),
        )?;

        let mut handles = BTreeMap::new();
        for record in records {
            match &record.job_handle {
                Some(handle) => {
                    handles.insert(record.key(), handle.clone());
                }
                None => warn!(
                    "Referral {} is {} without a job handle; skipped",
                    record.referral_id, record.status
                ),
            }
        }
        self.monitor(&handles).await
    }

    /// Find the single done workbook job that was given `document_id`.
    ///
    /// Searches executions of the configured executable in `project`
    /// (default: the output project) created within the lookup window.
    pub async fn lookup_by_input(
        &self,
        document_id: &str,
        project: Option<&str>,
    ) -> Result<JobDescription, LookupError> {
        let query = FindExecutionsQuery {
            project: project.unwrap_or(&self.job.output_project).to_string(),
            executable_name: self.job.executable_name.clone(),
            state: JobState::Done,
            created_after: Utc::now() - Duration::hours(i64::from(self.lookup.created_after_hours)),
        };

        let mut matches: Vec<JobDescription> = self
            .jobs
            .find_executions(&query)
            .await?
            .into_iter()
            .filter(|desc| desc.input_document.as_deref() == Some(document_id))
            .collect();

        match matches.len() {
            0 => Err(LookupError::NotFound(document_id.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(LookupError::Ambiguous {
                document: document_id.to_string(),
                count,
                handles: matches.iter().map(|m| m.id.to_string()).collect(),
            }),
        }
    }
}
