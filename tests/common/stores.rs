//! Store doubles layered over [`MemoryStore`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use gleanforge::model::Document;
use gleanforge::stores::{DocumentStore, MemoryStore, StoreError};

/// Delegates to a [`MemoryStore`] but fails `update_metadata` for one
/// poisoned document id. Lets sweep tests prove that one bad row does not
/// take the rest of the batch down with it.
#[derive(Debug)]
pub struct PoisonedDocuments {
    inner: Arc<MemoryStore>,
    poisoned: String,
}

impl PoisonedDocuments {
    pub fn new(inner: Arc<MemoryStore>, poisoned: impl Into<String>) -> Self {
        Self {
            inner,
            poisoned: poisoned.into(),
        }
    }
}

#[async_trait]
impl DocumentStore for PoisonedDocuments {
    async fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        self.inner.insert_document(document).await
    }

    async fn fetch_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.fetch_document(id).await
    }

    async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Document>, StoreError> {
        self.inner.find_by_content_hash(content_hash).await
    }

    async fn update_metadata(&self, id: &str, patch: Value) -> Result<Document, StoreError> {
        if id == self.poisoned {
            return Err(StoreError::backend("poisoned row"));
        }
        self.inner.update_metadata(id, patch).await
    }

    async fn update_embedding_state(
        &self,
        id: &str,
        model_id: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner
            .update_embedding_state(id, model_id, embedded_at)
            .await
    }

    async fn sweep_candidates(
        &self,
        stale_before: DateTime<Utc>,
        expired_by: DateTime<Utc>,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.sweep_candidates(stale_before, expired_by).await
    }

    async fn count_documents(&self) -> Result<u64, StoreError> {
        self.inner.count_documents().await
    }
}
