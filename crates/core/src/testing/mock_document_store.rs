//! Mock document store for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::platform::{DocumentStore, PlatformError};

/// Mock implementation of the DocumentStore trait.
///
/// Serves documents from memory and records every read. Unknown ids fail
/// with `PlatformError::NotFound`.
#[derive(Debug, Default)]
pub struct MockDocumentStore {
    documents: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// Ids read so far, in call order.
    reads: Arc<RwLock<Vec<String>>>,
    /// If set, the next read will fail with this error.
    next_error: Arc<RwLock<Option<PlatformError>>>,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `document_id`.
    pub async fn insert(&self, document_id: &str, content: Vec<u8>) {
        self.documents
            .write()
            .await
            .insert(document_id.to_string(), content);
    }

    /// Store a JSON document under `document_id`.
    pub async fn insert_json(&self, document_id: &str, content: &Value) {
        self.insert(document_id, content.to_string().into_bytes())
            .await;
    }

    /// Ids read so far.
    pub async fn reads(&self) -> Vec<String> {
        self.reads.read().await.clone()
    }

    /// Configure the next read to fail with the given error.
    pub async fn set_next_error(&self, error: PlatformError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn read(&self, document_id: &str) -> Result<Vec<u8>, PlatformError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        self.reads.write().await.push(document_id.to_string());

        self.documents
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(document_id.to_string()))
    }
}
