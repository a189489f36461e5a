//! Mock job execution service for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::platform::{
    FindExecutionsQuery, JobDescription, JobService, JobState, PlatformError, SubmitJobRequest,
};
use crate::referral::{ArtifactRef, JobHandle};

/// A recorded job submission for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedSubmit {
    /// The request that was made.
    pub request: SubmitJobRequest,
    /// Handle handed back.
    pub handle: JobHandle,
    /// When the request was made.
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of the JobService trait.
///
/// Provides controllable behavior for testing:
/// - Track submitted jobs and execution searches for assertions
/// - Drive job states (running, done with or without output, failed)
/// - Simulate rejected credentials and one-off failures
///
/// # Example
///
/// ```rust,ignore
/// let jobs = MockJobService::new();
///
/// let handle = jobs.submit(request).await?;
/// assert_eq!(jobs.submitted_jobs().await.len(), 1);
///
/// // Finish the job with an artifact
/// jobs.complete(&handle, "file-X1").await;
/// let desc = jobs.describe(&handle).await?;
/// assert_eq!(desc.state, JobState::Done);
/// ```
#[derive(Debug)]
pub struct MockJobService {
    /// Recorded submit calls.
    submitted: Arc<RwLock<Vec<RecordedSubmit>>>,
    /// Recorded find_executions calls.
    queries: Arc<RwLock<Vec<FindExecutionsQuery>>>,
    /// Known jobs by handle.
    jobs: Arc<RwLock<HashMap<String, JobDescription>>>,
    /// Number of describe calls served.
    describes: Arc<RwLock<usize>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<PlatformError>>>,
    /// When set, whoami rejects the credential.
    rejected: Arc<RwLock<bool>>,
    /// Counter for generating unique handles.
    handle_counter: Arc<RwLock<u32>>,
}

impl Default for MockJobService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobService {
    /// Create a new mock job service.
    pub fn new() -> Self {
        Self {
            submitted: Arc::new(RwLock::new(Vec::new())),
            queries: Arc::new(RwLock::new(Vec::new())),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            describes: Arc::new(RwLock::new(0)),
            next_error: Arc::new(RwLock::new(None)),
            rejected: Arc::new(RwLock::new(false)),
            handle_counter: Arc::new(RwLock::new(0)),
        }
    }

    /// Get all recorded submissions.
    pub async fn submitted_jobs(&self) -> Vec<RecordedSubmit> {
        self.submitted.read().await.clone()
    }

    /// Get all recorded execution searches.
    pub async fn execution_queries(&self) -> Vec<FindExecutionsQuery> {
        self.queries.read().await.clone()
    }

    /// Number of describe calls served so far.
    pub async fn describe_count(&self) -> usize {
        *self.describes.read().await
    }

    /// Make whoami reject the credential from now on.
    pub async fn reject_credentials(&self) {
        *self.rejected.write().await = true;
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: PlatformError) {
        *self.next_error.write().await = Some(error);
    }

    /// Pre-populate a job with a raw platform state and optional artifact.
    pub async fn add_job(&self, handle: &str, state: &str, artifact: Option<&str>) {
        self.jobs.write().await.insert(
            handle.to_string(),
            JobDescription {
                id: JobHandle::new(handle),
                state: JobState::from_raw(state),
                executable_name: None,
                input_document: None,
                artifact: artifact.map(ArtifactRef::new),
            },
        );
    }

    /// Pre-populate a finished execution that was given `input_document`.
    pub async fn add_execution(&self, handle: &str, input_document: &str, artifact: Option<&str>) {
        self.jobs.write().await.insert(
            handle.to_string(),
            JobDescription {
                id: JobHandle::new(handle),
                state: JobState::Done,
                executable_name: None,
                input_document: Some(input_document.to_string()),
                artifact: artifact.map(ArtifactRef::new),
            },
        );
    }

    /// Set the raw state of a known job.
    pub async fn set_state(&self, handle: &JobHandle, state: &str) {
        if let Some(job) = self.jobs.write().await.get_mut(handle.as_str()) {
            job.state = JobState::from_raw(state);
        }
    }

    /// Finish a known job with an output artifact.
    pub async fn complete(&self, handle: &JobHandle, artifact: &str) {
        if let Some(job) = self.jobs.write().await.get_mut(handle.as_str()) {
            job.state = JobState::Done;
            job.artifact = Some(ArtifactRef::new(artifact));
        }
    }

    /// Finish a known job without recording any output.
    pub async fn complete_without_output(&self, handle: &JobHandle) {
        if let Some(job) = self.jobs.write().await.get_mut(handle.as_str()) {
            job.state = JobState::Done;
            job.artifact = None;
        }
    }

    /// Take the next error if set.
    async fn take_error(&self) -> Option<PlatformError> {
        self.next_error.write().await.take()
    }

    /// Generate a unique mock handle.
    async fn generate_handle(&self) -> JobHandle {
        let mut counter = self.handle_counter.write().await;
        *counter += 1;
        JobHandle(format!("job-mock{:08x}", *counter))
    }
}

#[async_trait]
impl JobService for MockJobService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn whoami(&self) -> Result<String, PlatformError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        if *self.rejected.read().await {
            return Err(PlatformError::AuthenticationFailed(
                "invalid bearer token".to_string(),
            ));
        }
        Ok("user-mock".to_string())
    }

    async fn submit(&self, request: SubmitJobRequest) -> Result<JobHandle, PlatformError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        let handle = self.generate_handle().await;
        self.jobs.write().await.insert(
            handle.0.clone(),
            JobDescription {
                id: handle.clone(),
                state: JobState::from_raw("idle"),
                executable_name: None,
                input_document: Some(request.input_document_id.clone()),
                artifact: None,
            },
        );
        self.submitted.write().await.push(RecordedSubmit {
            request,
            handle: handle.clone(),
            timestamp: Utc::now(),
        });

        Ok(handle)
    }

    async fn describe(&self, handle: &JobHandle) -> Result<JobDescription, PlatformError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        *self.describes.write().await += 1;

        self.jobs
            .read()
            .await
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))
    }

    async fn find_executions(
        &self,
        query: &FindExecutionsQuery,
    ) -> Result<Vec<JobDescription>, PlatformError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        self.queries.write().await.push(query.clone());

        let jobs = self.jobs.read().await;
        let mut found: Vec<JobDescription> = jobs
            .values()
            .filter(|job| job.state == query.state)
            .filter(|job| {
                job.executable_name
                    .as_deref()
                    .map_or(true, |name| name == query.executable_name)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn request(document: &str) -> SubmitJobRequest {
        SubmitJobRequest {
            executable_id: "app-workbook".to_string(),
            name: "workbook_R1".to_string(),
            project: "project-out".to_string(),
            input: Map::new(),
            input_document_id: document.to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_then_complete() {
        let jobs = MockJobService::new();
        let handle = jobs.submit(request("file-F1")).await.unwrap();

        let desc = jobs.describe(&handle).await.unwrap();
        assert!(desc.state.is_pending());
        assert_eq!(desc.input_document.as_deref(), Some("file-F1"));

        jobs.complete(&handle, "file-X1").await;
        let desc = jobs.describe(&handle).await.unwrap();
        assert_eq!(desc.state, JobState::Done);
        assert_eq!(desc.artifact, Some(ArtifactRef::new("file-X1")));
        assert_eq!(jobs.describe_count().await, 2);
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let jobs = MockJobService::new();
        let first = jobs.submit(request("file-F1")).await.unwrap();
        let second = jobs.submit(request("file-F1")).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(jobs.submitted_jobs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_next_error_is_consumed_once() {
        let jobs = MockJobService::new();
        jobs.set_next_error(PlatformError::Timeout).await;

        assert!(jobs.submit(request("file-F1")).await.is_err());
        assert!(jobs.submit(request("file-F1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let jobs = MockJobService::new();
        let result = jobs.describe(&JobHandle::new("job-nope")).await;
        assert!(matches!(result, Err(PlatformError::NotFound(_))));
    }
}
