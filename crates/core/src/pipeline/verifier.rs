//! Input document check: `Uploaded -> CheckPassed | CheckFailed`.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::VerifierConfig;
use crate::metrics::RECORDS_VERIFIED;
use crate::platform::{DocumentStore, PlatformError};
use crate::referral::{
    RecordKey, RecordStore, RecordUpdate, ReferralFilter, ReferralRecord, ReferralStatus,
    StoreError, TransitionOutcome,
};

use super::types::{PipelineContext, VerifyReport};

/// Per-record verification errors. The record is left in `Uploaded`.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{key} is {status}; only uploaded records can be checked")]
    NotUploaded {
        key: RecordKey,
        status: ReferralStatus,
    },

    #[error("could not read input document {document} for {key}: {source}")]
    Unreadable {
        key: RecordKey,
        document: String,
        #[source]
        source: PlatformError,
    },

    #[error("input document {document} for {key} is malformed: {reason}")]
    Malformed {
        key: RecordKey,
        document: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of checking a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Embedded identifier matches; record now `CheckPassed`.
    Passed,
    /// Embedded identifier differs; record now `CheckFailed`.
    Mismatch { embedded: String },
    /// Record left `Uploaded` while its document was read; nothing written.
    AlreadyChecked(ReferralStatus),
}

/// Checks that each uploaded document belongs to its referral.
pub struct InputVerifier {
    store: Arc<dyn RecordStore>,
    documents: Arc<dyn DocumentStore>,
    config: VerifierConfig,
}

impl InputVerifier {
    pub fn new(ctx: &PipelineContext, config: VerifierConfig) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            documents: Arc::clone(&ctx.documents),
            config,
        }
    }

    /// Check one record and write at most one status change.
    pub async fn verify(&self, record: &ReferralRecord) -> Result<VerifyOutcome, VerifyError> {
        let key = record.key();
        if record.status != ReferralStatus::Uploaded {
            return Err(VerifyError::NotUploaded {
                key,
                status: record.status,
            });
        }

        let content = self
            .documents
            .read(&record.input_document_id)
            .await
            .map_err(|source| VerifyError::Unreadable {
                key: key.clone(),
                document: record.input_document_id.clone(),
                source,
            })?;

        let embedded =
            extract_identifier(&content, &self.config.identifier_path).map_err(|reason| {
                VerifyError::Malformed {
                    key: key.clone(),
                    document: record.input_document_id.clone(),
                    reason,
                }
            })?;

        let (outcome, next) = if embedded == record.referral_id {
            (VerifyOutcome::Passed, ReferralStatus::CheckPassed)
        } else {
            (
                VerifyOutcome::Mismatch {
                    embedded: embedded.clone(),
                },
                ReferralStatus::CheckFailed,
            )
        };

        match self
            .store
            .transition(&key, ReferralStatus::Uploaded, next, RecordUpdate::new())?
        {
            TransitionOutcome::Applied(_) => {
                match &outcome {
                    VerifyOutcome::Passed => info!(
                        "Referral {} is present in {}; correct document uploaded",
                        record.referral_id, record.input_document_id
                    ),
                    _ => warn!(
                        "Referral {} is NOT present in {} (document names {}); marked {}",
                        record.referral_id, record.input_document_id, embedded, next
                    ),
                }
                Ok(outcome)
            }
            TransitionOutcome::Stale { current } => {
                warn!(
                    "{} moved to {} while its document was being checked; left as is",
                    record.referral_id, current
                );
                Ok(VerifyOutcome::AlreadyChecked(current))
            }
        }
    }

    /// Check every record in `Uploaded` (up to `limit`).
    ///
    /// Only a failing store aborts the pass; unreadable or malformed documents
    /// are reported and their records left for manual follow-up.
    pub async fn verify_uploaded(&self, limit: Option<usize>) -> Result<VerifyReport, StoreError> {
        let records = self.store.list(
            &ReferralFilter::new()
                .with_status(ReferralStatus::Uploaded)
                .with_limit(limit),
        )?;

        let mut report = VerifyReport::default();
        if records.is_empty() {
            info!("No records found in status {}", ReferralStatus::Uploaded);
            return Ok(report);
        }

        for record in &records {
            let key = record.key();
            match self.verify(record).await {
                Ok(VerifyOutcome::Passed) => {
                    RECORDS_VERIFIED.with_label_values(&["passed"]).inc();
                    report.passed.push(key);
                }
                Ok(VerifyOutcome::Mismatch { .. }) => {
                    RECORDS_VERIFIED.with_label_values(&["mismatch"]).inc();
                    report.mismatched.push(key);
                }
                Ok(VerifyOutcome::AlreadyChecked(_)) => report.already_checked.push(key),
                Err(VerifyError::Store(e)) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let label = match &e {
                        VerifyError::Unreadable { .. } => "unreadable",
                        VerifyError::Malformed { .. } => "malformed",
                        _ => "error",
                    };
                    RECORDS_VERIFIED.with_label_values(&[label]).inc();
                    warn!("{}; record left in {} for manual follow-up", e, ReferralStatus::Uploaded);
                    report.unresolved.push((key, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

/// Parse `content` as JSON and read the identifier at the dotted `path`.
fn extract_identifier(content: &[u8], path: &str) -> Result<String, String> {
    let document: Value =
        serde_json::from_slice(content).map_err(|e| format!("not valid JSON: {}", e))?;

    let mut node = &document;
    for segment in path.split('.') {
        node = node
            .get(segment)
            .ok_or_else(|| format!("no `{}` field", path))?;
    }

    match node {
        Value::String(id) => Ok(id.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(format!("`{}` is not an identifier: {}", path, other)),
    }
}
