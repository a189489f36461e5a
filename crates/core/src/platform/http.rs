//! HTTP client for the job execution platform's JSON API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::AuthToken;
use crate::config::{JobConfig, PlatformConfig};
use crate::referral::{ArtifactRef, JobHandle};

use super::{
    link_id, DocumentStore, FindExecutionsQuery, JobDescription, JobService, JobState,
    PlatformError, SubmitJobRequest,
};

/// Which raw input/output keys carry the document and the artifact.
#[derive(Debug, Clone)]
struct FieldMapping {
    input_field: String,
    output_field: String,
}

/// Platform API client.
///
/// Every API route is a `POST {api_url}/{object-or-class}/{method}` with a
/// JSON body, authenticated with a bearer token.
pub struct PlatformClient {
    client: Client,
    base_url: String,
    token: AuthToken,
    fields: FieldMapping,
}

impl PlatformClient {
    /// Create a new platform client.
    pub fn new(
        config: &PlatformConfig,
        job: &JobConfig,
        token: AuthToken,
    ) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| PlatformError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            fields: FieldMapping {
                input_field: job.input_field.clone(),
                output_field: job.output_field.clone(),
            },
        })
    }

    fn map_send_error(e: reqwest::Error) -> PlatformError {
        if e.is_timeout() {
            PlatformError::Timeout
        } else if e.is_connect() {
            PlatformError::ConnectionFailed(e.to_string())
        } else {
            PlatformError::ApiError(e.to_string())
        }
    }

    /// Make an authenticated API call and return the decoded JSON body.
    async fn call(&self, route: &str, body: &Value) -> Result<Value, PlatformError> {
        let url = format!("{}/{}", self.base_url, route.trim_start_matches('/'));
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose())
            .json(body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(match status.as_u16() {
                401 => PlatformError::AuthenticationFailed(snippet),
                404 => PlatformError::NotFound(route.to_string()),
                _ => PlatformError::ApiError(format!("HTTP {}: {}", status, snippet)),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))
    }

    /// Decode a raw describe payload into the typed job result.
    fn decode_description(&self, desc: &Value) -> Result<JobDescription, PlatformError> {
        let id = desc
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::InvalidResponse("job description without id".into()))?;

        let state = desc
            .get("state")
            .and_then(Value::as_str)
            .map(JobState::from_raw)
            .ok_or_else(|| {
                PlatformError::InvalidResponse(format!("job {} has no state", id))
            })?;

        let input_document = desc
            .get("input")
            .and_then(|input| input.get(&self.fields.input_field))
            .and_then(link_id);

        let artifact = desc
            .get("output")
            .and_then(|output| output.get(&self.fields.output_field))
            .and_then(link_id)
            .map(ArtifactRef);

        Ok(JobDescription {
            id: JobHandle::new(id),
            state,
            executable_name: desc
                .get("executableName")
                .and_then(Value::as_str)
                .map(str::to_string),
            input_document,
            artifact,
        })
    }
}

#[async_trait]
impl JobService for PlatformClient {
    fn name(&self) -> &str {
        "platform"
    }

    async fn whoami(&self) -> Result<String, PlatformError> {
        let body = self.call("system/whoami", &json!({})).await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PlatformError::InvalidResponse("whoami response without id".into()))
    }

    async fn submit(&self, request: SubmitJobRequest) -> Result<JobHandle, PlatformError> {
        let body = json!({
            "name": request.name,
            "input": request.input,
            "project": request.project,
        });

        let response = self
            .call(&format!("{}/run", request.executable_id), &body)
            .await?;

        response
            .get("id")
            .and_then(Value::as_str)
            .map(JobHandle::new)
            .ok_or_else(|| PlatformError::InvalidResponse("run response without job id".into()))
    }

    async fn describe(&self, handle: &JobHandle) -> Result<JobDescription, PlatformError> {
        let desc = self
            .call(&format!("{}/describe", handle.as_str()), &json!({}))
            .await?;
        self.decode_description(&desc)
    }

    async fn find_executions(
        &self,
        query: &FindExecutionsQuery,
    ) -> Result<Vec<JobDescription>, PlatformError> {
        let mut found = Vec::new();
        let mut starting: Option<Value> = None;

        loop {
            let mut body = json!({
                "project": query.project,
                "state": query.state.as_str(),
                "created": { "after": query.created_after.timestamp_millis() },
                "describe": true,
            });
            if let Some(cursor) = starting.take() {
                body["starting"] = cursor;
            }

            let page = self.call("system/findExecutions", &body).await?;

            let results = page
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    PlatformError::InvalidResponse("findExecutions response without results".into())
                })?;

            for result in results {
                let Some(desc) = result.get("describe") else {
                    continue;
                };
                let description = self.decode_description(desc)?;
                if description.executable_name.as_deref() == Some(query.executable_name.as_str())
                {
                    found.push(description);
                }
            }

            match page.get("next") {
                Some(next) if !next.is_null() => starting = Some(next.clone()),
                _ => break,
            }
        }

        debug!(
            "Found {} {} executions in {}",
            found.len(),
            query.executable_name,
            query.project
        );
        Ok(found)
    }
}

#[async_trait]
impl DocumentStore for PlatformClient {
    async fn read(&self, document_id: &str) -> Result<Vec<u8>, PlatformError> {
        let response = self
            .call(&format!("{}/download", document_id), &json!({}))
            .await?;

        let url = response
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::InvalidResponse("download response without url".into()))?;

        // The download URL is pre-authorised; only the headers it came with are sent
        let mut request = self.client.get(url);
        if let Some(headers) = response.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let download = request.send().await.map_err(Self::map_send_error)?;
        if !download.status().is_success() {
            return Err(PlatformError::ApiError(format!(
                "download of {} failed: HTTP {}",
                document_id,
                download.status()
            )));
        }

        let bytes = download
            .bytes()
            .await
            .map_err(|e| PlatformError::ApiError(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
