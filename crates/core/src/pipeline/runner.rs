//! Batch runner.
//!
//! Drives one pass over the store:
//! - Verify: every `Uploaded` record
//! - Launch: every `CheckPassed` / `JobStarted` record
//! - Wait, then monitor the handles the launch produced
//! - Fetch: every `ArtifactReady` record, when an output directory is set
//!
//! Each stage re-queries the store, so an interrupted run is resumed by
//! running again.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::auth::{authenticate, Identity};
use crate::config::Config;
use crate::referral::{ReferralStatus, StoreError};

use super::fetch::ArtifactFetcher;
use super::launcher::JobLauncher;
use super::monitor::JobMonitor;
use super::types::{LaunchOutcome, PipelineContext, PipelineError, RunSummary, StatusCount};
use super::verifier::InputVerifier;

/// Wires the four stages together for one batch run.
pub struct BatchRunner {
    ctx: PipelineContext,
    verifier: InputVerifier,
    launcher: JobLauncher,
    monitor: JobMonitor,
    fetcher: ArtifactFetcher,
    wait: Duration,
    /// Records per stage; `None` processes everything eligible.
    limit: Option<usize>,
    test_batch_size: usize,
    output_dir: Option<PathBuf>,
}

impl BatchRunner {
    pub fn new(ctx: PipelineContext, config: &Config) -> Self {
        Self {
            verifier: InputVerifier::new(&ctx, config.verifier.clone()),
            launcher: JobLauncher::new(&ctx, config.job.clone(), config.launcher.relaunch),
            monitor: JobMonitor::new(&ctx, config.job.clone(), config.lookup.clone()),
            fetcher: ArtifactFetcher::new(&ctx),
            ctx,
            wait: Duration::from_secs(config.run.wait_secs),
            limit: None,
            test_batch_size: config.run.test_batch_size,
            output_dir: None,
        }
    }

    /// Limit every stage to the configured test batch size.
    pub fn with_testing(mut self, testing: bool) -> Self {
        self.limit = testing.then_some(self.test_batch_size);
        self
    }

    /// Override the pause between launching and monitoring.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Download artifacts into `dir` at the end of the run.
    pub fn with_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_dir = dir;
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn verifier(&self) -> &InputVerifier {
        &self.verifier
    }

    pub fn launcher(&self) -> &JobLauncher {
        &self.launcher
    }

    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    pub fn fetcher(&self) -> &ArtifactFetcher {
        &self.fetcher
    }

    /// Confirm the platform accepts the credential.
    pub async fn authenticate(&self) -> Result<Identity, PipelineError> {
        Ok(authenticate(self.ctx.jobs.as_ref()).await?)
    }

    /// Record counts for every status.
    pub fn status(&self) -> Result<Vec<StatusCount>, StoreError> {
        ReferralStatus::ALL
            .iter()
            .map(|&status| {
                Ok(StatusCount {
                    status,
                    count: self.ctx.store.count_by_status(status)?,
                })
            })
            .collect()
    }

    /// Run the whole batch.
    ///
    /// Authentication and store failures abort; everything else is collected
    /// into the summary.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let identity = self.authenticate().await?;
        if let Some(limit) = self.limit {
            info!("Testing mode: at most {} records per stage", limit);
        }

        let verify = self.verifier.verify_uploaded(self.limit).await?;

        let (launch, monitor) = match self.launcher.launch_eligible(self.limit).await? {
            LaunchOutcome::NoWork => (None, None),
            LaunchOutcome::Launched(report) if report.handles.is_empty() => (Some(report), None),
            LaunchOutcome::Launched(report) => {
                self.pause().await;
                let monitor = self.monitor.monitor(&report.handles).await?;
                (Some(report), Some(monitor))
            }
        };

        let fetch = match &self.output_dir {
            Some(dir) => Some(self.fetcher.fetch_ready(dir, self.limit).await?),
            None => None,
        };

        let summary = RunSummary {
            identity,
            verify,
            launch,
            monitor,
            fetch,
        };
        summary.log();
        Ok(summary)
    }

    async fn pause(&self) {
        if self.wait.is_zero() {
            return;
        }
        info!(
            "Waiting {}s for jobs to finish before checking them",
            self.wait.as_secs()
        );
        tokio::time::sleep(self.wait).await;
    }
}
