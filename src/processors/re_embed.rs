//! RE_EMBED: migrate a document's vectors to a different embedding model.
//!
//! The only path that changes a document's embedding-model identity. The
//! target model comes from the payload and is validated before anything is
//! read or written; defaulting to the old model here would silently undo a
//! migration.

use async_trait::async_trait;
use tracing::instrument;

use crate::job::Job;
use crate::processor::{JobProcessor, JobReport, ProcessorContext, ProcessorError};
use crate::processors::embed::{EmbedDeps, mark_embedding_failure, run_embedding_pass};

/// RE_EMBED job: re-run the embedding pass under `payload.newModelId` and
/// stamp the new model onto every replacement chunk row and the document.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReEmbedProcessor;

#[async_trait]
impl JobProcessor for ReEmbedProcessor {
    #[instrument(skip(self, job, ctx), fields(job_id = %ctx.job_id), err)]
    async fn process(
        &self,
        job: &Job,
        ctx: &ProcessorContext,
    ) -> Result<JobReport, ProcessorError> {
        let new_model_id = job
            .payload_str("newModelId")
            .ok_or(ProcessorError::Validation {
                field: "newModelId",
            })?;
        if new_model_id.is_empty() {
            return Err(ProcessorError::InvalidField {
                field: "newModelId",
                message: "must not be empty".to_string(),
            });
        }
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
            ctx.emit_for_document(document_id, "re-embed", "no content; nothing to re-embed")?;
            return Ok(JobReport::summary("nothing to re-embed"));
        }

        let deps = EmbedDeps::from_ctx(ctx);
        match run_embedding_pass(&deps, &document, new_model_id, &ctx.config.chunking).await {
            Ok(outcome) => {
                ctx.emit_for_document(
                    document_id,
                    "re-embed",
                    format!(
                        "re-embedded {} chunks under {}",
                        outcome.chunk_count, outcome.model_id
                    ),
                )?;
                Ok(JobReport::summary(format!(
                    "re-embedded {} chunks under {}",
                    outcome.chunk_count, outcome.model_id
                ))
                .with_follow_on(vec![Job::dedup_check(document_id)]))
            }
            Err(error) => {
                mark_embedding_failure(ctx.documents.as_ref(), document_id, &error).await;
                Err(error)
            }
        }
    }
}
