//! In-memory backend implementing all three store traits.
//!
//! Backs tests and single-process runs. State lives behind `parking_lot`
//! mutexes that are never held across an await point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::time::Duration;

use super::{ChunkStore, DeadLetter, DocumentStore, JobQueue, QueueDepth, StoreError};
use crate::job::{Job, QueuedJob};
use crate::model::{ChunkRecord, Document};
use crate::utils::json_ext::{MergeStrategy, deep_merge};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Ready,
    Running,
}

#[derive(Debug)]
struct QueueEntry {
    queued: QueuedJob,
    status: EntryStatus,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<QueueEntry>,
    dead: Vec<DeadLetter>,
    next_id: u64,
}

/// Process-local document, chunk, and queue storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<FxHashMap<String, Document>>,
    chunks: Mutex<FxHashMap<String, Vec<ChunkRecord>>>,
    queue: Mutex<QueueState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        let mut documents = self.documents.lock();
        if documents
            .values()
            .any(|existing| existing.content_hash == document.content_hash)
        {
            return Err(StoreError::Duplicate {
                content_hash: document.content_hash,
            });
        }
        documents.insert(document.id.clone(), document);
        Ok(())
    }

    async fn fetch_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.lock().get(id).cloned())
    }

    async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .documents
            .lock()
            .values()
            .find(|doc| doc.content_hash == content_hash)
            .cloned())
    }

    async fn update_metadata(&self, id: &str, patch: Value) -> Result<Document, StoreError> {
        let mut documents = self.documents.lock();
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        doc.metadata = deep_merge(&doc.metadata, &patch, MergeStrategy::DeepMerge)
            .map_err(|e| StoreError::backend(e.to_string()))?;
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn update_embedding_state(
        &self,
        id: &str,
        model_id: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.lock();
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        doc.mark_embedded(model_id, embedded_at);
        Ok(())
    }

    async fn sweep_candidates(
        &self,
        stale_before: DateTime<Utc>,
        expired_by: DateTime<Utc>,
    ) -> Result<Vec<Document>, StoreError> {
        let documents = self.documents.lock();
        let mut selected: Vec<Document> = documents
            .values()
            .filter(|doc| {
                doc.ingested_at < stale_before
                    || doc.valid_until.is_some_and(|until| until <= expired_by)
            })
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.ingested_at.cmp(&b.ingested_at));
        Ok(selected)
    }

    async fn count_documents(&self) -> Result<u64, StoreError> {
        Ok(self.documents.lock().len() as u64)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn replace_chunks(
        &self,
        source_id: &str,
        mut chunks: Vec<ChunkRecord>,
    ) -> Result<usize, StoreError> {
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        let count = chunks.len();
        let mut map = self.chunks.lock();
        if chunks.is_empty() {
            map.remove(source_id);
        } else {
            map.insert(source_id.to_string(), chunks);
        }
        Ok(count)
    }

    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        Ok(self.chunks.lock().get(source_id).cloned().unwrap_or_default())
    }

    async fn primary_chunk(&self, source_id: &str) -> Result<Option<ChunkRecord>, StoreError> {
        Ok(self
            .chunks
            .lock()
            .get(source_id)
            .and_then(|chunks| chunks.first().cloned()))
    }

    async fn dedup_candidates(
        &self,
        exclude_source_id: &str,
        model_id: &str,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let documents = self.documents.lock();
        let chunks = self.chunks.lock();

        let mut candidates: Vec<ChunkRecord> = chunks
            .iter()
            .filter(|(source_id, _)| source_id.as_str() != exclude_source_id)
            .filter(|(source_id, _)| {
                documents
                    .get(source_id.as_str())
                    .is_some_and(|doc| doc.embedding_model_id.as_deref() == Some(model_id))
            })
            .filter_map(|(_, source_chunks)| source_chunks.first())
            .filter(|chunk| chunk.model_id == model_id)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(candidates)
    }

    async fn delete_chunks(&self, source_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .chunks
            .lock()
            .remove(source_id)
            .map(|chunks| chunks.len())
            .unwrap_or(0))
    }

    async fn count_chunks(&self) -> Result<u64, StoreError> {
        Ok(self.chunks.lock().values().map(|c| c.len() as u64).sum())
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(&self, job: Job) -> Result<String, StoreError> {
        let mut queue = self.queue.lock();
        queue.next_id += 1;
        let id = format!("job-{}", queue.next_id);
        queue.entries.push(QueueEntry {
            queued: QueuedJob {
                id: id.clone(),
                job,
                attempt: 0,
                enqueued_at: Utc::now(),
                not_before: None,
            },
            status: EntryStatus::Ready,
            last_error: None,
        });
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>, StoreError> {
        let now = Utc::now();
        let mut queue = self.queue.lock();
        let entry = queue.entries.iter_mut().find(|entry| {
            entry.status == EntryStatus::Ready
                && entry
                    .queued
                    .not_before
                    .is_none_or(|not_before| not_before <= now)
        });
        Ok(entry.map(|entry| {
            entry.status = EntryStatus::Running;
            entry.queued.clone()
        }))
    }

    async fn complete(&self, job_id: &str) -> Result<(), StoreError> {
        let mut queue = self.queue.lock();
        let index = queue
            .entries
            .iter()
            .position(|entry| entry.queued.id == job_id)
            .ok_or_else(|| StoreError::NotFound {
                id: job_id.to_string(),
            })?;
        queue.entries.remove(index);
        Ok(())
    }

    async fn retry(&self, job_id: &str, delay: Duration, error: &str) -> Result<(), StoreError> {
        let not_before = Utc::now() + delay;
        let mut queue = self.queue.lock();
        let entry = queue
            .entries
            .iter_mut()
            .find(|entry| entry.queued.id == job_id)
            .ok_or_else(|| StoreError::NotFound {
                id: job_id.to_string(),
            })?;
        entry.status = EntryStatus::Ready;
        entry.queued.attempt += 1;
        entry.queued.not_before = Some(not_before);
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn dead_letter(&self, job_id: &str, reason: &str) -> Result<(), StoreError> {
        let mut queue = self.queue.lock();
        let index = queue
            .entries
            .iter()
            .position(|entry| entry.queued.id == job_id)
            .ok_or_else(|| StoreError::NotFound {
                id: job_id.to_string(),
            })?;
        let entry = queue.entries.remove(index);
        queue.dead.push(DeadLetter {
            job: entry.queued,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, StoreError> {
        let queue = self.queue.lock();
        let mut depth = QueueDepth {
            dead: queue.dead.len() as u64,
            ..QueueDepth::default()
        };
        for entry in &queue.entries {
            match entry.status {
                EntryStatus::Ready => depth.ready += 1,
                EntryStatus::Running => depth.running += 1,
            }
        }
        Ok(depth)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(self.queue.lock().dead.clone())
    }
}
