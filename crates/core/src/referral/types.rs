//! Core referral data types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a referral record.
///
/// The numeric codes are the persisted representation and match the status
/// table of the tracking database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    /// Input document uploaded, not yet checked.
    Uploaded,
    /// Embedded identifier matched the referral.
    CheckPassed,
    /// Embedded identifier did not match. Terminal.
    CheckFailed,
    /// A workbook job has been submitted.
    JobStarted,
    /// The job finished and produced an artifact.
    ArtifactReady,
    /// The artifact was downloaded locally. Terminal.
    Delivered,
}

impl ReferralStatus {
    /// Every status, in progression order.
    pub const ALL: [ReferralStatus; 6] = [
        ReferralStatus::Uploaded,
        ReferralStatus::CheckPassed,
        ReferralStatus::CheckFailed,
        ReferralStatus::JobStarted,
        ReferralStatus::ArtifactReady,
        ReferralStatus::Delivered,
    ];

    /// Numeric status code as stored in the database.
    pub fn code(&self) -> i64 {
        match self {
            ReferralStatus::Uploaded => 5,
            ReferralStatus::CheckPassed => 6,
            ReferralStatus::CheckFailed => 7,
            ReferralStatus::JobStarted => 8,
            ReferralStatus::ArtifactReady => 9,
            ReferralStatus::Delivered => 10,
        }
    }

    /// Parse a stored status code.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Returns the string representation used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Uploaded => "uploaded",
            ReferralStatus::CheckPassed => "check_passed",
            ReferralStatus::CheckFailed => "check_failed",
            ReferralStatus::JobStarted => "job_started",
            ReferralStatus::ArtifactReady => "artifact_ready",
            ReferralStatus::Delivered => "delivered",
        }
    }

    /// Whether no stage will ever move a record out of this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReferralStatus::CheckFailed | ReferralStatus::Delivered)
    }

    /// Whether `next` is a legal successor of this status.
    ///
    /// `JobStarted -> JobStarted` is legal: a re-launch overwrites the job
    /// handle without advancing the record.
    pub fn can_transition_to(&self, next: ReferralStatus) -> bool {
        use ReferralStatus::*;
        matches!(
            (self, next),
            (Uploaded, CheckPassed)
                | (Uploaded, CheckFailed)
                | (CheckPassed, JobStarted)
                | (JobStarted, JobStarted)
                | (JobStarted, ArtifactReady)
                | (ArtifactReady, Delivered)
        )
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.as_str(), self.code())
    }
}

/// Opaque reference to a job submitted to the execution service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a produced output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique key of a referral row.
///
/// Displays as the referral id, which is what operators recognise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub referral_id: String,
    pub input_document_id: String,
}

impl RecordKey {
    pub fn new(referral_id: impl Into<String>, input_document_id: impl Into<String>) -> Self {
        Self {
            referral_id: referral_id.into(),
            input_document_id: input_document_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.referral_id)
    }
}

/// A tracked referral awaiting (or done with) workbook generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralRecord {
    /// Stable business key (family / report identifier).
    pub referral_id: String,
    /// Uploaded input document.
    pub input_document_id: String,
    /// Current processing status.
    pub status: ReferralStatus,
    /// Submitted job, once launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_handle: Option<JobHandle>,
    /// Produced artifact, once the job succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactRef>,
    /// Local copy of the artifact, once fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Time of the last committed change.
    pub updated_at: DateTime<Utc>,
}

impl ReferralRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.referral_id, &self.input_document_id)
    }
}
