//! Referral records and the store that tracks their status.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteRecordStore;
pub use store::{
    NewReferral, RecordStore, RecordUpdate, ReferralFilter, StoreError, TransitionOutcome,
};
pub use types::{ArtifactRef, JobHandle, RecordKey, ReferralRecord, ReferralStatus};
