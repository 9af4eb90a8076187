//! EMBED: chunk a document's text and generate its vectors.
//!
//! The core pass lives in [`run_embedding_pass`] so the persistence path
//! can run the same chunk/budget/embed/replace sequence inline at ingest
//! time. Replacement is delete-then-insert scoped to the document, which
//! makes redelivered EMBED jobs redo work instead of corrupting state.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::budget::{BudgetGuard, TokenUsage, estimate_tokens};
use crate::chunking::{ChunkingConfig, chunk_text};
use crate::event_bus::{Event, EventEmitter};
use crate::job::Job;
use crate::model::{ChunkRecord, Document, metadata_keys};
use crate::processor::{JobProcessor, JobReport, ProcessorContext, ProcessorError};
use crate::providers::{EmbeddingClient, ProviderError};
use crate::stores::{ChunkStore, DocumentStore};

/// Everything an embedding pass touches, borrowed so the pass can run from
/// a processor context or from the persistence path.
pub(crate) struct EmbedDeps<'a> {
    pub documents: &'a dyn DocumentStore,
    pub chunks: &'a dyn ChunkStore,
    pub embeddings: &'a dyn EmbeddingClient,
    pub budget: &'a BudgetGuard,
    pub emitter: &'a dyn EventEmitter,
}

impl<'a> EmbedDeps<'a> {
    pub(crate) fn from_ctx(ctx: &'a ProcessorContext) -> Self {
        Self {
            documents: ctx.documents.as_ref(),
            chunks: ctx.chunks.as_ref(),
            embeddings: ctx.embeddings.as_ref(),
            budget: ctx.budget.as_ref(),
            emitter: ctx.emitter.as_ref(),
        }
    }
}

/// What a completed pass produced.
pub(crate) struct EmbedOutcome {
    pub chunk_count: usize,
    pub usage: TokenUsage,
    pub model_id: String,
}

/// Chunk `document.content`, budget-check, embed under `model_id`, and
/// replace the document's chunk rows with the new set.
///
/// On success the document's embedding state is updated and its metadata
/// `embedding` slice records the pass (with `error: null`, clearing any
/// marker a failed earlier pass left). On failure the reservation is
/// released and no store mutation has happened.
pub(crate) async fn run_embedding_pass(
    deps: &EmbedDeps<'_>,
    document: &Document,
    model_id: &str,
    chunking: &ChunkingConfig,
) -> Result<EmbedOutcome, ProcessorError> {
    let pieces = chunk_text(&document.content, document.chunk_strategy, chunking);
    if pieces.is_empty() {
        return Ok(EmbedOutcome {
            chunk_count: 0,
            usage: TokenUsage::default(),
            model_id: model_id.to_string(),
        });
    }

    deps.budget.check_cost_budget()?;
    let estimate: u64 = pieces.iter().map(|piece| estimate_tokens(&piece.text)).sum();
    let reservation = deps.budget.check_token_budget(estimate)?;

    let inputs: Vec<String> = pieces.iter().map(|piece| piece.text.clone()).collect();
    let batch = match deps.embeddings.embed(model_id, &inputs).await {
        Ok(batch) => batch,
        Err(error) => {
            deps.budget.release(reservation);
            return Err(error.into());
        }
    };
    if batch.vectors.len() != pieces.len() {
        deps.budget.release(reservation);
        return Err(ProviderError::EmbeddingMismatch {
            requested: pieces.len(),
            returned: batch.vectors.len(),
        }
        .into());
    }

    let cost = deps.budget.record_usage(reservation, model_id, &batch.usage);
    deps.emitter
        .emit(Event::provider_usage("embedding", model_id, batch.usage, cost))?;

    let rows: Vec<ChunkRecord> = pieces
        .iter()
        .zip(batch.vectors)
        .map(|(piece, vector)| {
            ChunkRecord::new(document.id.as_str(), piece.index, &piece.text, vector, model_id)
        })
        .collect();

    let chunk_count = deps.chunks.replace_chunks(&document.id, rows).await?;
    let now = Utc::now();
    deps.documents
        .update_embedding_state(&document.id, model_id, now)
        .await?;
    let patch = json!({
        (metadata_keys::EMBEDDING): {
            "model": model_id,
            "chunkCount": chunk_count,
            "embeddedAt": now,
            "error": null,
        },
    });
    deps.documents.update_metadata(&document.id, patch).await?;

    Ok(EmbedOutcome {
        chunk_count,
        usage: batch.usage,
        model_id: model_id.to_string(),
    })
}

/// Best-effort error marker under the metadata `embedding` slice, so a
/// failed pass is visible on the document and not only in the queue.
pub(crate) async fn mark_embedding_failure(
    documents: &dyn DocumentStore,
    document_id: &str,
    error: &ProcessorError,
) {
    let marker = json!({
        (metadata_keys::EMBEDDING): {
            "error": {
                "message": error.to_string(),
                "failedAt": Utc::now(),
            },
        },
    });
    if let Err(marker_error) = documents.update_metadata(document_id, marker).await {
        tracing::warn!(
            document_id,
            error = %marker_error,
            "failed to record the embedding error marker"
        );
    }
}

/// EMBED job: (re)generate a document's vectors under its current model.
///
/// Uses the model already recorded on the document when one exists, so an
/// ordinary re-run never changes a document's model identity; only RE_EMBED
/// does that.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbedProcessor;

#[async_trait]
impl JobProcessor for EmbedProcessor {
    #[instrument(skip(self, job, ctx), fields(job_id = %ctx.job_id), err)]
    async fn process(
        &self,
        job: &Job,
        ctx: &ProcessorContext,
    ) -> Result<JobReport, ProcessorError> {
        let document_id = job
            .document_id
            .as_deref()
            .ok_or(ProcessorError::Validation { field: "documentId" })?;
        let document = ctx
            .documents
            .fetch_document(document_id)
            .await?
            .ok_or_else(|| ProcessorError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;

        if document.content.trim().is_empty() {
            ctx.emit_for_document(document_id, "embed", "no content; nothing to embed")?;
            return Ok(JobReport::summary("nothing to embed"));
        }

        let model_id = document
            .embedding_model_id
            .clone()
            .unwrap_or_else(|| ctx.config.embedding_model.clone());

        let deps = EmbedDeps::from_ctx(ctx);
        match run_embedding_pass(&deps, &document, &model_id, &ctx.config.chunking).await {
            Ok(outcome) => {
                ctx.emit_for_document(
                    document_id,
                    "embed",
                    format!(
                        "embedded {} chunks with {}",
                        outcome.chunk_count, outcome.model_id
                    ),
                )?;
                Ok(
                    JobReport::summary(format!("embedded {} chunks", outcome.chunk_count))
                        .with_follow_on(vec![Job::dedup_check(document_id)]),
                )
            }
            Err(error) => {
                mark_embedding_failure(ctx.documents.as_ref(), document_id, &error).await;
                Err(error)
            }
        }
    }
}
