//! Types for the remote job execution platform.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::referral::{ArtifactRef, JobHandle};

/// Key the platform uses to mark a value as a link to another object.
pub const LINK_KEY: &str = "$dnanexus_link";

/// Errors that can occur talking to the platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Completion state of a remote job, as far as the stages care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Finished successfully; output is available.
    Done,
    /// Finished unsuccessfully (failed or terminated).
    Failed,
    /// Anything else (idle, runnable, running, waiting...), raw name kept.
    Other(String),
}

impl JobState {
    /// Classify a raw platform state name.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "done" => JobState::Done,
            "failed" | "terminated" => JobState::Failed,
            other => JobState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Other(raw) => raw,
        }
    }

    /// Whether the job may still produce output.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Other(_))
    }
}

/// A job description decoded into the fields the stages use.
///
/// The integration layer decides which raw input/output keys map onto
/// `input_document` and `artifact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub id: JobHandle,
    pub state: JobState,
    /// Executable the job ran (used to filter execution searches).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_name: Option<String>,
    /// Input document the job was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_document: Option<String>,
    /// Output artifact, present once a `done` job recorded it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
}

/// Request to run an executable.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitJobRequest {
    /// Executable (app/applet) identifier.
    pub executable_id: String,
    /// Job name shown on the platform.
    pub name: String,
    /// Project the job runs in.
    pub project: String,
    /// Input payload, keyed by the executable's input names.
    pub input: Map<String, Value>,
    /// Document the payload references (for logs and test assertions).
    pub input_document_id: String,
}

/// Query for past executions.
#[derive(Debug, Clone, PartialEq)]
pub struct FindExecutionsQuery {
    pub project: String,
    /// Only executions of this executable are returned.
    pub executable_name: String,
    /// Only executions in this state are returned.
    pub state: JobState,
    /// Only executions created after this instant are returned.
    pub created_after: DateTime<Utc>,
}

/// Trait for job execution backends.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Check the credential and return the authenticated user id.
    async fn whoami(&self) -> Result<String, PlatformError>;

    /// Submit a job.
    async fn submit(&self, request: SubmitJobRequest) -> Result<JobHandle, PlatformError>;

    /// Describe a job's current state and recorded input/output.
    async fn describe(&self, handle: &JobHandle) -> Result<JobDescription, PlatformError>;

    /// Search past executions.
    async fn find_executions(
        &self,
        query: &FindExecutionsQuery,
    ) -> Result<Vec<JobDescription>, PlatformError>;
}

/// Trait for reading stored documents (input documents and artifacts).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document's full content.
    async fn read(&self, document_id: &str) -> Result<Vec<u8>, PlatformError>;
}

/// Build a link value pointing at a stored object, optionally qualified by project.
pub fn object_link(id: &str, project: Option<&str>) -> Value {
    match project {
        Some(project) => json!({ LINK_KEY: { "project": project, "id": id } }),
        None => json!({ LINK_KEY: id }),
    }
}

/// Extract the object id from a link value.
///
/// Accepts `{"$dnanexus_link": "id"}`, `{"$dnanexus_link": {"id": "id", ...}}`
/// and a bare string id.
pub fn link_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(map) => match map.get(LINK_KEY)? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Object(inner) => inner
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            _ => None,
        },
        _ => None,
    }
}
