//! SQLite-backed record store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    ArtifactRef, JobHandle, NewReferral, RecordKey, RecordStore, RecordUpdate, ReferralFilter,
    ReferralRecord, ReferralStatus, StoreError, TransitionOutcome,
};

const SELECT_COLUMNS: &str = "SELECT referral_id, input_document_id, status, job_handle, artifact_id, local_path, updated_at FROM referrals";

/// SQLite-backed record store.
///
/// Holds a single connection for the lifetime of a run. Every write commits
/// on its own; there is no batching across records.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS referrals (
                referral_id TEXT NOT NULL,
                input_document_id TEXT NOT NULL,
                status INTEGER NOT NULL,
                job_handle TEXT,
                artifact_id TEXT,
                local_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (referral_id, input_document_id)
            );

            CREATE INDEX IF NOT EXISTS idx_referrals_status ON referrals(status);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ReferralRecord> {
        let referral_id: String = row.get(0)?;
        let input_document_id: String = row.get(1)?;
        let status_code: i64 = row.get(2)?;
        let job_handle: Option<String> = row.get(3)?;
        let artifact_id: Option<String> = row.get(4)?;
        let local_path: Option<String> = row.get(5)?;
        let updated_at_str: String = row.get(6)?;

        let status = ReferralStatus::from_code(status_code)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, status_code))?;

        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(ReferralRecord {
            referral_id,
            input_document_id,
            status,
            job_handle: job_handle.map(JobHandle),
            artifact_id: artifact_id.map(ArtifactRef),
            local_path: local_path.map(PathBuf::from),
            updated_at,
        })
    }

    fn fetch(conn: &Connection, key: &RecordKey) -> Result<Option<ReferralRecord>, StoreError> {
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE referral_id = ? AND input_document_id = ?"),
            params![key.referral_id, key.input_document_id],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert(&self, request: NewReferral) -> Result<ReferralRecord, StoreError> {
        let conn = self.lock()?;
        let key = RecordKey::new(&request.referral_id, &request.input_document_id);

        if Self::fetch(&conn, &key)?.is_some() {
            return Err(StoreError::Duplicate(key));
        }

        let now = Utc::now();
        let status = ReferralStatus::Uploaded;

        conn.execute(
            "INSERT INTO referrals (referral_id, input_document_id, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            params![
                request.referral_id,
                request.input_document_id,
                status.code(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(ReferralRecord {
            referral_id: request.referral_id,
            input_document_id: request.input_document_id,
            status,
            job_handle: None,
            artifact_id: None,
            local_path: None,
            updated_at: now,
        })
    }

    fn get(&self, key: &RecordKey) -> Result<Option<ReferralRecord>, StoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, key)
    }

    fn list(&self, filter: &ReferralFilter) -> Result<Vec<ReferralRecord>, StoreError> {
        let conn = self.lock()?;

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        let where_clause = if filter.statuses.is_empty() {
            String::new()
        } else {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            for status in &filter.statuses {
                params.push(Box::new(status.code()));
            }
            format!("WHERE status IN ({})", placeholders)
        };

        // SQLite treats a negative LIMIT as "no limit"
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        params.push(Box::new(limit));

        let sql = format!(
            "{SELECT_COLUMNS} {} ORDER BY created_at ASC, referral_id ASC LIMIT ?",
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_record)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            records.push(row_result.map_err(|e| StoreError::Database(e.to_string()))?);
        }

        Ok(records)
    }

    fn count_by_status(&self, status: ReferralStatus) -> Result<i64, StoreError> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT COUNT(*) FROM referrals WHERE status = ?",
            params![status.code()],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn transition(
        &self,
        key: &RecordKey,
        from: ReferralStatus,
        to: ReferralStatus,
        update: RecordUpdate,
    ) -> Result<TransitionOutcome, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                key: key.clone(),
                from,
                to,
            });
        }

        let conn = self.lock()?;
        let now = Utc::now();

        let changed = conn
            .execute(
                "UPDATE referrals SET status = ?, \
                 job_handle = COALESCE(?, job_handle), \
                 artifact_id = COALESCE(?, artifact_id), \
                 local_path = COALESCE(?, local_path), \
                 updated_at = ? \
                 WHERE referral_id = ? AND input_document_id = ? AND status = ?",
                params![
                    to.code(),
                    update.job_handle.as_ref().map(|h| h.as_str()),
                    update.artifact_id.as_ref().map(|a| a.as_str()),
                    update
                        .local_path
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned()),
                    now.to_rfc3339(),
                    key.referral_id,
                    key.input_document_id,
                    from.code(),
                ],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let current = Self::fetch(&conn, key)?.ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if changed == 0 {
            return Ok(TransitionOutcome::Stale {
                current: current.status,
            });
        }

        Ok(TransitionOutcome::Applied(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteRecordStore {
        SqliteRecordStore::in_memory().unwrap()
    }

    fn register(store: &SqliteRecordStore, referral_id: &str, document_id: &str) -> RecordKey {
        store
            .insert(NewReferral {
                referral_id: referral_id.to_string(),
                input_document_id: document_id.to_string(),
            })
            .unwrap()
            .key()
    }

    #[test]
    fn test_insert_starts_uploaded() {
        let store = create_test_store();
        let key = register(&store, "R1", "file-F1");

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.status, ReferralStatus::Uploaded);
        assert!(record.job_handle.is_none());
        assert!(record.artifact_id.is_none());
        assert!(record.local_path.is_none());
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let store = create_test_store();
        register(&store, "R1", "file-F1");

        let result = store.insert(NewReferral {
            referral_id: "R1".to_string(),
            input_document_id: "file-F1".to_string(),
        });
        assert!(matches!(result, Err(StoreError::Duplicate(_))));

        // Same referral, different document is a distinct row
        register(&store, "R1", "file-F2");
        assert_eq!(store.count_by_status(ReferralStatus::Uploaded).unwrap(), 2);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = create_test_store();
        assert!(store.get(&RecordKey::new("nope", "nope")).unwrap().is_none());
    }

    #[test]
    fn test_list_by_status() {
        let store = create_test_store();
        let k1 = register(&store, "R1", "file-F1");
        register(&store, "R2", "file-F2");
        register(&store, "R3", "file-F3");

        store
            .transition(
                &k1,
                ReferralStatus::Uploaded,
                ReferralStatus::CheckPassed,
                RecordUpdate::new(),
            )
            .unwrap();

        let uploaded = store
            .list(&ReferralFilter::new().with_status(ReferralStatus::Uploaded))
            .unwrap();
        assert_eq!(uploaded.len(), 2);

        let passed = store
            .list(&ReferralFilter::new().with_status(ReferralStatus::CheckPassed))
            .unwrap();
        assert_eq!(passed.len(), 1);
        assert_eq!(passed[0].referral_id, "R1");

        let either = store
            .list(&ReferralFilter::new().with_statuses(&[
                ReferralStatus::Uploaded,
                ReferralStatus::CheckPassed,
            ]))
            .unwrap();
        assert_eq!(either.len(), 3);
    }

    #[test]
    fn test_list_limit() {
        let store = create_test_store();
        for i in 0..7 {
            register(&store, &format!("R{}", i), &format!("file-F{}", i));
        }

        let limited = store
            .list(&ReferralFilter::new().with_limit(Some(5)))
            .unwrap();
        assert_eq!(limited.len(), 5);

        let all = store.list(&ReferralFilter::new()).unwrap();
        assert_eq!(all.len(), 7);
    }

    #[test]
    fn test_identifiers_are_bound_not_interpolated() {
        let store = create_test_store();
        let key = register(&store, "R1'; DROP TABLE referrals; --", "file-F1");

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.referral_id, "R1'; DROP TABLE referrals; --");
        assert_eq!(store.count_by_status(ReferralStatus::Uploaded).unwrap(), 1);
    }

    #[test]
    fn test_transition_writes_fields() {
        let store = create_test_store();
        let key = register(&store, "R1", "file-F1");

        store
            .transition(
                &key,
                ReferralStatus::Uploaded,
                ReferralStatus::CheckPassed,
                RecordUpdate::new(),
            )
            .unwrap();
        let outcome = store
            .transition(
                &key,
                ReferralStatus::CheckPassed,
                ReferralStatus::JobStarted,
                RecordUpdate::new().with_job_handle(JobHandle::new("job-1")),
            )
            .unwrap();

        let TransitionOutcome::Applied(record) = outcome else {
            panic!("expected applied transition");
        };
        assert_eq!(record.status, ReferralStatus::JobStarted);
        assert_eq!(record.job_handle, Some(JobHandle::new("job-1")));
        assert!(record.artifact_id.is_none());
    }

    #[test]
    fn test_transition_keeps_fields_when_update_empty() {
        let store = create_test_store();
        let key = register(&store, "R1", "file-F1");
        for (from, to, update) in [
            (
                ReferralStatus::Uploaded,
                ReferralStatus::CheckPassed,
                RecordUpdate::new(),
            ),
            (
                ReferralStatus::CheckPassed,
                ReferralStatus::JobStarted,
                RecordUpdate::new().with_job_handle(JobHandle::new("job-1")),
            ),
            (
                ReferralStatus::JobStarted,
                ReferralStatus::ArtifactReady,
                RecordUpdate::new().with_artifact(ArtifactRef::new("file-A1")),
            ),
        ] {
            store.transition(&key, from, to, update).unwrap();
        }

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.job_handle, Some(JobHandle::new("job-1")));
        assert_eq!(record.artifact_id, Some(ArtifactRef::new("file-A1")));
    }

    #[test]
    fn test_relaunch_overwrites_handle() {
        let store = create_test_store();
        let key = register(&store, "R1", "file-F1");
        store
            .transition(
                &key,
                ReferralStatus::Uploaded,
                ReferralStatus::CheckPassed,
                RecordUpdate::new(),
            )
            .unwrap();
        store
            .transition(
                &key,
                ReferralStatus::CheckPassed,
                ReferralStatus::JobStarted,
                RecordUpdate::new().with_job_handle(JobHandle::new("job-1")),
            )
            .unwrap();
        store
            .transition(
                &key,
                ReferralStatus::JobStarted,
                ReferralStatus::JobStarted,
                RecordUpdate::new().with_job_handle(JobHandle::new("job-2")),
            )
            .unwrap();

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.status, ReferralStatus::JobStarted);
        assert_eq!(record.job_handle, Some(JobHandle::new("job-2")));
    }

    #[test]
    fn test_transition_stale_when_status_moved() {
        let store = create_test_store();
        let key = register(&store, "R1", "file-F1");
        store
            .transition(
                &key,
                ReferralStatus::Uploaded,
                ReferralStatus::CheckFailed,
                RecordUpdate::new(),
            )
            .unwrap();

        let outcome = store
            .transition(
                &key,
                ReferralStatus::Uploaded,
                ReferralStatus::CheckPassed,
                RecordUpdate::new(),
            )
            .unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::Stale {
                current: ReferralStatus::CheckFailed
            }
        );
        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.status, ReferralStatus::CheckFailed);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let store = create_test_store();
        let key = register(&store, "R1", "file-F1");

        let result = store.transition(
            &key,
            ReferralStatus::Uploaded,
            ReferralStatus::JobStarted,
            RecordUpdate::new(),
        );

        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
        assert_eq!(
            store.get(&key).unwrap().unwrap().status,
            ReferralStatus::Uploaded
        );
    }

    #[test]
    fn test_transition_nonexistent() {
        let store = create_test_store();
        let result = store.transition(
            &RecordKey::new("R9", "file-F9"),
            ReferralStatus::Uploaded,
            ReferralStatus::CheckPassed,
            RecordUpdate::new(),
        );
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_file_based_store_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("referrals.db");

        {
            let store = SqliteRecordStore::new(&db_path).unwrap();
            register(&store, "R1", "file-F1");
        }

        assert!(db_path.exists());

        let reopened = SqliteRecordStore::new(&db_path).unwrap();
        let record = reopened.get(&RecordKey::new("R1", "file-F1")).unwrap();
        assert!(record.is_some());
    }
}
