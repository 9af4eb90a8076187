//! DEDUP_CHECK: flag near-duplicate documents by primary-vector cosine.
//!
//! Flags are advisory. Nothing is deleted or merged; the match list lands
//! in both documents' `dedup` metadata slices for downstream ranking or
//! manual curation. Candidates are scoped to the subject's embedding model,
//! and chunks whose owning document is mid-re-embed (recorded model
//! disagrees with the chunk's) never enter the comparison.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{instrument, warn};

use crate::job::Job;
use crate::model::{DedupMatch, metadata_keys};
use crate::processor::{JobProcessor, JobReport, ProcessorContext, ProcessorError};
use crate::similarity::cosine_similarity;
use crate::stores::StoreError;
use crate::utils::json_ext::get_by_path;

/// DEDUP_CHECK job: compare a document's primary vector against its peers
/// and record matches at or above the configured threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct DedupCheckProcessor;

#[async_trait]
impl JobProcessor for DedupCheckProcessor {
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

        let Some(primary) = ctx.chunks.primary_chunk(document_id).await? else {
            ctx.emit_for_document(document_id, "dedup", "no vectors yet; nothing to compare")?;
            return Ok(JobReport::summary("no vectors to compare"));
        };

        // The subject itself can be mid-re-embed; comparing its old vector
        // would report matches the migration is about to invalidate. The
        // re-embed enqueues a fresh DEDUP_CHECK when it lands.
        if document.embedding_model_id.as_deref() != Some(primary.model_id.as_str()) {
            ctx.emit_for_document(
                document_id,
                "dedup",
                "embedding model in flux; skipping comparison",
            )?;
            return Ok(JobReport::summary("embedding model in flux; skipped"));
        }

        let candidates = ctx
            .chunks
            .dedup_candidates(document_id, &primary.model_id)
            .await?;

        let mut matches: Vec<DedupMatch> = candidates
            .iter()
            .filter_map(|candidate| {
                cosine_similarity(&primary.vector, &candidate.vector).and_then(|similarity| {
                    (similarity >= ctx.config.dedup_threshold).then(|| DedupMatch {
                        source_id: candidate.source_id.clone(),
                        similarity,
                    })
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(ctx.config.dedup_max_matches);

        let now = Utc::now();
        let duplicate = !matches.is_empty();
        let patch = json!({
            (metadata_keys::DEDUP): {
                "duplicate": duplicate,
                "matches": matches,
                "modelId": primary.model_id,
                "checkedAt": now,
                "note": if duplicate { None } else { Some("no duplicates found") },
            },
        });
        ctx.documents.update_metadata(document_id, patch).await?;

        for hit in &matches {
            self.flag_reciprocal(ctx, hit, document_id, &primary.model_id)
                .await?;
        }

        let summary = if duplicate {
            format!("flagged {} near-duplicates", matches.len())
        } else {
            "no duplicates found".to_string()
        };
        ctx.emit_for_document(document_id, "dedup", summary.clone())?;
        Ok(JobReport::summary(summary))
    }
}

impl DedupCheckProcessor {
    /// Merges the reverse match into the matched document's `dedup` slice,
    /// preserving matches it already holds against other documents.
    async fn flag_reciprocal(
        &self,
        ctx: &ProcessorContext,
        hit: &DedupMatch,
        document_id: &str,
        model_id: &str,
    ) -> Result<(), ProcessorError> {
        let Some(peer) = ctx.documents.fetch_document(&hit.source_id).await? else {
            warn!(
                matched = %hit.source_id,
                "matched document vanished before the reciprocal flag"
            );
            return Ok(());
        };

        let matches_path = format!("{}.matches", metadata_keys::DEDUP);
        let mut peer_matches: Vec<DedupMatch> = get_by_path(&peer.metadata, &matches_path)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        peer_matches.retain(|entry| entry.source_id != document_id);
        peer_matches.push(DedupMatch {
            source_id: document_id.to_string(),
            similarity: hit.similarity,
        });
        peer_matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        peer_matches.truncate(ctx.config.dedup_max_matches);

        let patch = json!({
            (metadata_keys::DEDUP): {
                "duplicate": true,
                "matches": peer_matches,
                "modelId": model_id,
                "checkedAt": Utc::now(),
                "note": null,
            },
        });
        match ctx.documents.update_metadata(&peer.id, patch).await {
            Ok(_) => Ok(()),
            // Deleted between fetch and update; the flag has nowhere to go.
            Err(StoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
