//! Persistence traits and backends.
//!
//! Three seams cover the pipeline's state: [`DocumentStore`] for document
//! rows, [`ChunkStore`] for embedded chunks, and [`JobQueue`] for pending
//! work. [`MemoryStore`] implements all three for tests and small runs; the
//! sqlite backend (behind the `sqlite` feature) mirrors it durably on one
//! connection pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::job::{Job, QueuedJob};
use crate::model::{ChunkRecord, Document};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Errors raised by storage backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("document not found: {id}")]
    #[diagnostic(code(gleanforge::store::not_found))]
    NotFound { id: String },

    /// Insert collided with the content-hash uniqueness constraint.
    #[error("a document with content hash {content_hash} already exists")]
    #[diagnostic(
        code(gleanforge::store::duplicate),
        help("look the existing row up with find_by_content_hash")
    )]
    Duplicate { content_hash: String },

    #[error("store backend error: {message}")]
    #[diagnostic(code(gleanforge::store::backend))]
    Backend { message: String },

    #[error("store serialization error: {source}")]
    #[diagnostic(code(gleanforge::store::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    /// A stored row failed to decode into its domain type.
    #[error("corrupt record: {detail}")]
    #[diagnostic(code(gleanforge::store::corrupt))]
    Corrupt { detail: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }
}

/// Document rows and their pipeline state.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document. Fails with [`StoreError::Duplicate`] when a
    /// row with the same content hash already exists.
    async fn insert_document(&self, document: Document) -> Result<(), StoreError>;

    async fn fetch_document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    async fn find_by_content_hash(&self, content_hash: &str)
    -> Result<Option<Document>, StoreError>;

    /// Deep-merges `patch` into the document's metadata object and returns
    /// the updated row. Objects merge recursively; arrays and scalars in
    /// the patch replace what they collide with.
    async fn update_metadata(&self, id: &str, patch: Value) -> Result<Document, StoreError>;

    /// Records a completed embed pass for the document.
    async fn update_embedding_state(
        &self,
        id: &str,
        model_id: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Documents due for a freshness pass: ingested before `stale_before`,
    /// or expired (`valid_until` at or before `expired_by`).
    async fn sweep_candidates(
        &self,
        stale_before: DateTime<Utc>,
        expired_by: DateTime<Utc>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count_documents(&self) -> Result<u64, StoreError>;
}

/// Embedded chunks, keyed by their owning source.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Deletes the source's existing chunks and inserts `chunks` in their
    /// place, returning the inserted count. Running an embed pass twice
    /// therefore converges instead of accumulating rows.
    async fn replace_chunks(
        &self,
        source_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<usize, StoreError>;

    /// All chunks for a source, ordered by chunk index.
    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<ChunkRecord>, StoreError>;

    /// The source's lowest-index chunk, which serves as its primary vector
    /// for dedup comparisons.
    async fn primary_chunk(&self, source_id: &str) -> Result<Option<ChunkRecord>, StoreError>;

    /// Primary chunks of other sources that are comparable under
    /// `model_id`: the chunk's vector and the owning document's current
    /// embedding model must both match, so vectors from different models
    /// are never compared.
    async fn dedup_candidates(
        &self,
        exclude_source_id: &str,
        model_id: &str,
    ) -> Result<Vec<ChunkRecord>, StoreError>;

    async fn delete_chunks(&self, source_id: &str) -> Result<usize, StoreError>;

    async fn count_chunks(&self) -> Result<u64, StoreError>;
}

/// Counts of jobs by queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Enqueued and claimable (including delayed retries not yet visible).
    pub ready: u64,
    /// Claimed by a worker and in flight.
    pub running: u64,
    /// Exhausted their retries.
    pub dead: u64,
}

impl QueueDepth {
    /// True when no job is pending or in flight. Dead letters do not count;
    /// they require operator attention, not more polling.
    pub fn is_idle(&self) -> bool {
        self.ready == 0 && self.running == 0
    }
}

/// A job that exhausted its retries, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub job: QueuedJob,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// At-least-once delivery queue for pipeline jobs.
///
/// A claimed job stays `running` until the worker settles it with
/// [`JobQueue::complete`], [`JobQueue::retry`], or [`JobQueue::dead_letter`].
/// A worker that crashes mid-job leaves it running; delivery is
/// at-least-once and every processor is idempotent for that reason.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Adds a job and returns its queue id.
    async fn enqueue(&self, job: Job) -> Result<String, StoreError>;

    /// Claims the oldest ready job whose visibility time has passed, moving
    /// it to `running`. Returns `None` when nothing is claimable.
    async fn claim(&self) -> Result<Option<QueuedJob>, StoreError>;

    /// Settles a job as done and removes it from the queue.
    async fn complete(&self, job_id: &str) -> Result<(), StoreError>;

    /// Returns a job to `ready` with an incremented attempt count, hidden
    /// until `delay` has elapsed.
    async fn retry(&self, job_id: &str, delay: Duration, error: &str) -> Result<(), StoreError>;

    /// Removes a job from rotation permanently, recording why.
    async fn dead_letter(&self, job_id: &str, reason: &str) -> Result<(), StoreError>;

    async fn depth(&self) -> Result<QueueDepth, StoreError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError>;
}
