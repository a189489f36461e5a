//! Testing utilities and mock implementations of the platform traits.
//!
//! The mocks let the stages and the runner be exercised end to end against an
//! in-memory record store without a real platform.
//!
//! # Example
//!
//! ```rust,ignore
//! use workbooks_core::testing::{MockDocumentStore, MockJobService};
//!
//! let jobs = MockJobService::new();
//! let documents = MockDocumentStore::new();
//!
//! // Configure mock responses
//! documents.insert_json("file-F1", &json!({"family_id": "R1"})).await;
//! jobs.add_job("job-1", "done", Some("file-X1")).await;
//!
//! // Use in a PipelineContext...
//! ```

mod mock_document_store;
mod mock_job_service;

pub use mock_document_store::MockDocumentStore;
pub use mock_job_service::{MockJobService, RecordedSubmit};

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::json;
    use std::collections::BTreeMap;

    use crate::config::{
        Config, DatabaseConfig, FetchConfig, JobConfig, LauncherConfig, LookupConfig,
        PlatformConfig, RunConfig, VerifierConfig,
    };
    use crate::referral::{
        ArtifactRef, JobHandle, NewReferral, RecordKey, RecordStore, RecordUpdate,
        ReferralStatus,
    };

    /// Job settings with one static reference input and a qualified input project.
    pub fn job_config() -> JobConfig {
        JobConfig {
            executable_id: "app-workbook".to_string(),
            executable_name: "eggd_generate_rd_wgs_workbook".to_string(),
            input_project: Some("project-in".to_string()),
            output_project: "project-out".to_string(),
            name_prefix: "eggd_generate_rd_variant_workbook".to_string(),
            input_field: "json".to_string(),
            output_field: "xlsx_report".to_string(),
            inputs: BTreeMap::from([(
                "refseq_tsv".to_string(),
                json!({"$dnanexus_link": "file-refseq"}),
            )]),
        }
    }

    /// Full configuration with no wait and a test batch size of 2.
    pub fn config() -> Config {
        Config {
            platform: PlatformConfig::default(),
            database: DatabaseConfig::default(),
            job: job_config(),
            verifier: VerifierConfig::default(),
            launcher: LauncherConfig::default(),
            run: RunConfig {
                wait_secs: 0,
                test_batch_size: 2,
            },
            fetch: FetchConfig::default(),
            lookup: LookupConfig::default(),
        }
    }

    /// Walk a new record along `path`, applying `update` at each step.
    fn advance(
        store: &dyn RecordStore,
        referral_id: &str,
        document_id: &str,
        path: &[(ReferralStatus, RecordUpdate)],
    ) -> RecordKey {
        let record = store
            .insert(NewReferral {
                referral_id: referral_id.to_string(),
                input_document_id: document_id.to_string(),
            })
            .expect("insert fixture record");
        let key = record.key();

        let mut from = ReferralStatus::Uploaded;
        for (to, update) in path {
            let outcome = store
                .transition(&key, from, *to, update.clone())
                .expect("advance fixture record");
            assert!(outcome.is_applied(), "fixture record moved unexpectedly");
            from = *to;
        }
        key
    }

    /// Insert a record already in `CheckPassed`.
    pub fn passed_record(store: &dyn RecordStore, referral_id: &str, document_id: &str) -> RecordKey {
        advance(
            store,
            referral_id,
            document_id,
            &[(ReferralStatus::CheckPassed, RecordUpdate::new())],
        )
    }

    /// Insert a record already in `JobStarted` with `handle`.
    pub fn started_record(
        store: &dyn RecordStore,
        referral_id: &str,
        document_id: &str,
        handle: &str,
    ) -> RecordKey {
        advance(
            store,
            referral_id,
            document_id,
            &[
                (ReferralStatus::CheckPassed, RecordUpdate::new()),
                (
                    ReferralStatus::JobStarted,
                    RecordUpdate::new().with_job_handle(JobHandle::new(handle)),
                ),
            ],
        )
    }

    /// Insert a record already in `ArtifactReady` with `handle` and `artifact`.
    pub fn ready_record(
        store: &dyn RecordStore,
        referral_id: &str,
        document_id: &str,
        handle: &str,
        artifact: &str,
    ) -> RecordKey {
        advance(
            store,
            referral_id,
            document_id,
            &[
                (ReferralStatus::CheckPassed, RecordUpdate::new()),
                (
                    ReferralStatus::JobStarted,
                    RecordUpdate::new().with_job_handle(JobHandle::new(handle)),
                ),
                (
                    ReferralStatus::ArtifactReady,
                    RecordUpdate::new().with_artifact(ArtifactRef::new(artifact)),
                ),
            ],
        )
    }
}
