pub mod auth;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod platform;
pub mod referral;
pub mod testing;

pub use auth::{authenticate, AuthError, AuthToken, Identity};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, RelaunchPolicy,
};
pub use pipeline::{
    ArtifactFetcher, BatchRunner, FetchReport, InputVerifier, JobLauncher, JobMonitor,
    LaunchOutcome, LaunchReport, LookupError, MonitorReport, PipelineContext, PipelineError,
    RunSummary, StatusCount, VerifyReport,
};
pub use platform::{
    DocumentStore, JobDescription, JobService, JobState, PlatformClient, PlatformError,
};
pub use referral::{
    ArtifactRef, JobHandle, NewReferral, RecordKey, RecordStore, ReferralRecord, ReferralStatus,
    SqliteRecordStore, StoreError,
};
