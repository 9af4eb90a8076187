//! Shared persistence path for uploads and scrapes.
//!
//! [`PersistenceService::persist_document`] is the single entry through
//! which new content becomes a [`Document`] row: exact-duplicate rejection
//! by content hash, row creation, then a best-effort inline embedding pass.
//! An inline embedding failure never fails the persist; it is reported as
//! `partialFailure` in the receipt, marked in document metadata, and the
//! queued EMBED job becomes the retry path.
//!
//! The scrape processor delegates here, so scraped pages and direct uploads
//! get identical dedup and follow-on behavior.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::budget::BudgetGuard;
use crate::chunking::ChunkStrategy;
use crate::event_bus::{EmitterError, Event, EventEmitter};
use crate::job::Job;
use crate::model::{Document, content_hash_hex};
use crate::processor::ProcessorError;
use crate::processors::embed::{EmbedDeps, mark_embedding_failure, run_embedding_pass};
use crate::providers::EmbeddingClient;
use crate::runtimes::RuntimeConfig;
use crate::stores::{ChunkStore, DocumentStore, JobQueue, StoreError};

/// Errors from the persistence path itself. Inline embedding failures are
/// not errors here; they ride in the receipt.
#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("event bus error: {0}")]
    #[diagnostic(code(gleanforge::ingest::event_bus))]
    EventBus(#[from] EmitterError),
}

impl From<IngestError> for ProcessorError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Store(store) => ProcessorError::Store(store),
            IngestError::EventBus(bus) => ProcessorError::EventBus(bus),
        }
    }
}

/// What a caller hands to [`PersistenceService::persist_document`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistInput {
    pub title: String,
    /// Canonical text; the hashing, chunking, and enrichment input.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub chunk_strategy: ChunkStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    /// Caller-owned initial metadata object.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl PersistInput {
    pub fn text(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            raw_content: None,
            source_uri: None,
            chunk_strategy: ChunkStrategy::default(),
            valid_until: None,
            metadata: Value::Null,
        }
    }

    #[must_use]
    pub fn with_raw_content(mut self, raw: Vec<u8>) -> Self {
        self.raw_content = Some(raw);
        self
    }

    #[must_use]
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.chunk_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of a persist call, in the wire shape consumed by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistReceipt {
    pub document_id: String,
    /// True when a new row was created.
    pub persisted: bool,
    /// True when the content hash matched an existing document; the receipt
    /// then describes the surviving row.
    pub duplicate: bool,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub embedding_model_id: Option<String>,
    pub content_hash: String,
    /// True when the row was created but the inline embedding pass failed;
    /// a queued EMBED job is the retry path.
    pub partial_failure: bool,
}

impl PersistReceipt {
    fn for_existing(existing: &Document, chunk_count: usize, content_hash: String) -> Self {
        Self {
            document_id: existing.id.clone(),
            persisted: false,
            duplicate: true,
            chunks_created: chunk_count,
            embeddings_generated: chunk_count,
            embedding_model_id: existing.embedding_model_id.clone(),
            content_hash,
            partial_failure: false,
        }
    }
}

/// The shared ingestion entry point: dedup, row creation, inline embedding,
/// and follow-on job scheduling.
pub struct PersistenceService {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    queue: Arc<dyn JobQueue>,
    embeddings: Arc<dyn EmbeddingClient>,
    budget: Arc<BudgetGuard>,
    config: Arc<RuntimeConfig>,
    emitter: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for PersistenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceService").finish_non_exhaustive()
    }
}

impl PersistenceService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        queue: Arc<dyn JobQueue>,
        embeddings: Arc<dyn EmbeddingClient>,
        budget: Arc<BudgetGuard>,
        config: Arc<RuntimeConfig>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            documents,
            chunks,
            queue,
            embeddings,
            budget,
            config,
            emitter,
        }
    }

    /// Persists `input` as a document, or reports the existing document when
    /// the content hash already exists.
    ///
    /// Runs a best-effort inline embedding pass on new rows so freshly
    /// ingested content is searchable without waiting for the queue; a
    /// failure there is downgraded to `partialFailure` plus a metadata
    /// marker.
    #[instrument(skip(self, input), fields(title = %input.title), err)]
    pub async fn persist_document(&self, input: PersistInput) -> Result<PersistReceipt, IngestError> {
        let content_hash = content_hash_hex(input.content.as_bytes());

        if let Some(existing) = self.documents.find_by_content_hash(&content_hash).await? {
            return self.duplicate_receipt(existing, content_hash, &input.title).await;
        }

        let mut document = Document::new(input.title.clone(), input.content)
            .with_chunk_strategy(input.chunk_strategy);
        if let Some(raw) = input.raw_content {
            document = document.with_raw_content(raw);
        }
        if let Some(uri) = input.source_uri {
            document = document.with_source_uri(uri);
        }
        if let Some(valid_until) = input.valid_until {
            document = document.with_valid_until(valid_until);
        }
        if input.metadata.is_object() {
            document = document.with_metadata(input.metadata);
        }

        match self.documents.insert_document(document.clone()).await {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                // A concurrent identical persist won the insert race.
                let existing = self
                    .documents
                    .find_by_content_hash(&content_hash)
                    .await?
                    .ok_or_else(|| {
                        StoreError::backend("duplicate row vanished between insert and lookup")
                    })?;
                return self.duplicate_receipt(existing, content_hash, &input.title).await;
            }
            Err(e) => return Err(e.into()),
        }

        let mut receipt = PersistReceipt {
            document_id: document.id.clone(),
            persisted: true,
            duplicate: false,
            chunks_created: 0,
            embeddings_generated: 0,
            embedding_model_id: None,
            content_hash,
            partial_failure: false,
        };

        if !document.content.trim().is_empty() {
            let deps = EmbedDeps {
                documents: self.documents.as_ref(),
                chunks: self.chunks.as_ref(),
                embeddings: self.embeddings.as_ref(),
                budget: self.budget.as_ref(),
                emitter: self.emitter.as_ref(),
            };
            match run_embedding_pass(
                &deps,
                &document,
                &self.config.embedding_model,
                &self.config.chunking,
            )
            .await
            {
                Ok(outcome) => {
                    receipt.chunks_created = outcome.chunk_count;
                    receipt.embeddings_generated = outcome.chunk_count;
                    receipt.embedding_model_id = Some(outcome.model_id);
                }
                Err(error) => {
                    receipt.partial_failure = true;
                    warn!(
                        document_id = %document.id,
                        %error,
                        "inline embedding failed; deferring to the queued EMBED job"
                    );
                    mark_embedding_failure(self.documents.as_ref(), &document.id, &error).await;
                }
            }
        }

        self.emitter.emit(Event::diagnostic(
            "persist",
            format!(
                "persisted `{}` as {} ({} chunks{})",
                document.title,
                document.id,
                receipt.embeddings_generated,
                if receipt.partial_failure {
                    ", embedding deferred"
                } else {
                    ""
                }
            ),
        ))?;

        Ok(receipt)
    }

    /// Enqueues the follow-on jobs a fresh persist needs: ENRICH always,
    /// EMBED when the inline pass failed, DEDUP_CHECK when vectors exist.
    /// Duplicates get nothing; the surviving document already ran its
    /// pipeline. Returns the queue ids.
    #[instrument(skip(self, receipt), fields(document_id = %receipt.document_id), err)]
    pub async fn enqueue_post_persist_jobs(
        &self,
        receipt: &PersistReceipt,
    ) -> Result<Vec<String>, IngestError> {
        if receipt.duplicate {
            return Ok(Vec::new());
        }
        let document_id = receipt.document_id.as_str();
        let mut job_ids = vec![self.queue.enqueue(Job::enrich(document_id)).await?];
        if receipt.partial_failure {
            job_ids.push(self.queue.enqueue(Job::embed(document_id)).await?);
        }
        if receipt.embeddings_generated > 0 {
            job_ids.push(self.queue.enqueue(Job::dedup_check(document_id)).await?);
        }
        self.emitter.emit(Event::diagnostic(
            "persist",
            format!("queued {} follow-on jobs for {document_id}", job_ids.len()),
        ))?;
        Ok(job_ids)
    }

    async fn duplicate_receipt(
        &self,
        existing: Document,
        content_hash: String,
        title: &str,
    ) -> Result<PersistReceipt, IngestError> {
        let chunk_count = self.chunks.chunks_for_source(&existing.id).await?.len();
        self.emitter.emit(Event::diagnostic(
            "persist",
            format!(
                "content of `{title}` already ingested as {}; skipping",
                existing.id
            ),
        ))?;
        Ok(PersistReceipt::for_existing(&existing, chunk_count, content_hash))
    }
}
