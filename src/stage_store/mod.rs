// # Stage Store
//
// Typed key/value carrier for artifacts moving between workflow stages.
//
// - **StageStorage**: raw text backend (per-session memory or SQLite file)
// - **StageStore**: typed get/put/remove over the four artifact slots
// - **StageBatch**: multi-slot write that restores prior values on failure
//
// A missing slot is never an error: `get` yields `None` and the calling stage
// redirects to whichever stage produces that artifact.

mod artifact;
mod memory;
mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub use artifact::{
    MergedDocument, MergedSlot, MergedWriteFailure, StageArtifact, UploadedFileDescriptor,
};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Default encoded-text quota, roughly 7.5 MB of binary payload
pub const DEFAULT_QUOTA_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum StageStoreError {
    #[error("Storage quota exceeded: {requested} bytes requested, {available} bytes available")]
    QuotaExceeded { requested: usize, available: usize },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid encoded artifact: {0}")]
    Encoding(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StageStoreError {
    fn from(e: sqlx::Error) -> Self {
        StageStoreError::Backend(e.to_string())
    }
}

/// The four slots used by the document generation flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKey {
    UploadedFile,
    TemplateVariables,
    VariableValues,
    MergedDocument,
}

impl StageKey {
    pub const ALL: [StageKey; 4] = [
        StageKey::UploadedFile,
        StageKey::TemplateVariables,
        StageKey::VariableValues,
        StageKey::MergedDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::UploadedFile => "docflow.uploaded_file",
            StageKey::TemplateVariables => "docflow.template_variables",
            StageKey::VariableValues => "docflow.variable_values",
            StageKey::MergedDocument => "docflow.merged_document",
        }
    }
}

/// Raw text storage backend (allows swapping memory/SQLite, and mocking in tests)
#[async_trait]
pub trait StageStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StageStoreError>;
    /// Must either store the whole value or leave the slot untouched
    async fn put(&self, key: &str, value: &str) -> Result<(), StageStoreError>;
    async fn remove(&self, key: &str) -> Result<(), StageStoreError>;
}

enum BatchOp {
    Put(StageKey, String),
    Remove(StageKey),
}

impl BatchOp {
    fn key(&self) -> StageKey {
        match self {
            BatchOp::Put(key, _) | BatchOp::Remove(key) => *key,
        }
    }
}

/// Writes applied together by `StageStore::commit`
#[derive(Default)]
pub struct StageBatch {
    ops: Vec<BatchOp>,
}

impl StageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<A: StageArtifact>(mut self, artifact: &A) -> Result<Self, StageStoreError> {
        self.ops.push(BatchOp::Put(A::KEY, artifact.encode()?));
        Ok(self)
    }

    pub fn remove(mut self, key: StageKey) -> Self {
        self.ops.push(BatchOp::Remove(key));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Typed access to stage artifacts
#[derive(Clone)]
pub struct StageStore {
    storage: Arc<dyn StageStorage>,
}

impl StageStore {
    pub fn new(storage: Arc<dyn StageStorage>) -> Self {
        Self { storage }
    }

    pub fn in_memory(quota_bytes: usize) -> Self {
        Self::new(Arc::new(MemoryStorage::with_quota(quota_bytes)))
    }

    pub async fn put<A: StageArtifact>(&self, artifact: &A) -> Result<(), StageStoreError> {
        let encoded = artifact.encode()?;
        debug!("Storing {} ({} bytes)", A::KEY.as_str(), encoded.len());
        self.storage.put(A::KEY.as_str(), &encoded).await
    }

    /// Read an artifact; absent, unreadable or undecodable slots all yield `None`
    pub async fn get<A: StageArtifact>(&self) -> Option<A> {
        match self.try_get::<A>().await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", A::KEY.as_str(), e);
                None
            }
        }
    }

    /// Read an artifact, reporting decode failures instead of hiding them
    pub async fn try_get<A: StageArtifact>(&self) -> Result<Option<A>, StageStoreError> {
        match self.storage.get(A::KEY.as_str()).await? {
            Some(raw) => A::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn contains(&self, key: StageKey) -> bool {
        matches!(self.storage.get(key.as_str()).await, Ok(Some(_)))
    }

    pub async fn remove(&self, key: StageKey) -> Result<(), StageStoreError> {
        self.storage.remove(key.as_str()).await
    }

    /// Apply every write in the batch, or none of them.
    ///
    /// Prior contents of each touched slot are captured first; if any write
    /// fails, the slots written so far are restored in reverse order.
    pub async fn commit(&self, batch: StageBatch) -> Result<(), StageStoreError> {
        let mut previous = Vec::with_capacity(batch.ops.len());
        for op in &batch.ops {
            let key = op.key();
            previous.push((key, self.storage.get(key.as_str()).await?));
        }

        for (applied, op) in batch.ops.iter().enumerate() {
            let result = match op {
                BatchOp::Put(key, value) => self.storage.put(key.as_str(), value).await,
                BatchOp::Remove(key) => self.storage.remove(key.as_str()).await,
            };

            if let Err(e) = result {
                warn!(
                    "Stage batch failed at {}: {}, restoring {} slot(s)",
                    op.key().as_str(),
                    e,
                    applied
                );
                for (key, prior) in previous[..applied].iter().rev() {
                    let restored = match prior {
                        Some(value) => self.storage.put(key.as_str(), value).await,
                        None => self.storage.remove(key.as_str()).await,
                    };
                    if let Err(restore_err) = restored {
                        warn!("Failed to restore {}: {}", key.as_str(), restore_err);
                    }
                }
                return Err(e);
            }
        }

        Ok(())
    }

    /// Remove every slot used by the flow ("start new document")
    pub async fn clear_flow(&self) -> Result<(), StageStoreError> {
        for key in StageKey::ALL {
            self.storage.remove(key.as_str()).await?;
        }
        debug!("Cleared all stage artifacts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{RawVariableSet, TemplateVariableSet, VariableValues};
    use serde_json::json;

    fn small_set() -> TemplateVariableSet {
        TemplateVariableSet::from_detection(RawVariableSet {
            simple: vec!["client_name".to_string()],
            sections: vec![],
            total_count: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let store = StageStore::in_memory(DEFAULT_QUOTA_BYTES);
        assert!(store.get::<VariableValues>().await.is_none());
        assert!(store.try_get::<MergedDocument>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_survive_the_store() {
        let store = StageStore::in_memory(DEFAULT_QUOTA_BYTES);
        let values: VariableValues = serde_json::from_value(json!({
            "client_name": "Acme",
            "items": [{"title": "A", "table_rows": [{"key": "k1", "value": "v1"}]}]
        }))
        .unwrap();

        store.put(&values).await.unwrap();
        assert_eq!(store.get::<VariableValues>().await, Some(values));
    }

    #[tokio::test]
    async fn test_undecodable_slot_reads_as_absent() {
        let storage = Arc::new(MemoryStorage::default());
        storage
            .put(StageKey::MergedDocument.as_str(), "garbage")
            .await
            .unwrap();
        let store = StageStore::new(storage);

        assert!(store.get::<MergedDocument>().await.is_none());
        assert!(matches!(
            store.try_get::<MergedDocument>().await,
            Err(StageStoreError::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_batch_restores_previous_values() {
        let store = StageStore::in_memory(200);
        let set = small_set();
        let values = set.initial_values();
        store.put(&set).await.unwrap();
        store.put(&values).await.unwrap();

        let descriptor = UploadedFileDescriptor {
            name: "big.docx".to_string(),
            size: 0,
            mime_type: "application/octet-stream".to_string(),
            raw_bytes_encoded: "A".repeat(500),
        };
        let batch = StageBatch::new()
            .remove(StageKey::VariableValues)
            .put(&descriptor)
            .unwrap();

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StageStoreError::QuotaExceeded { .. }));
        assert_eq!(store.get::<VariableValues>().await, Some(values));
        assert_eq!(store.get::<TemplateVariableSet>().await, Some(set));
        assert!(store.get::<UploadedFileDescriptor>().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_flow_removes_every_slot() {
        let store = StageStore::in_memory(DEFAULT_QUOTA_BYTES);
        let set = small_set();
        store.put(&set).await.unwrap();
        store.put(&set.initial_values()).await.unwrap();
        store
            .put(&MergedDocument {
                content_type: "application/pdf".to_string(),
                bytes: vec![1],
            })
            .await
            .unwrap();

        store.clear_flow().await.unwrap();
        for key in StageKey::ALL {
            assert!(!store.contains(key).await);
        }
    }
}
