//! FRESHNESS: exponential-decay freshness scoring.
//!
//! Retrieval layers rank results by similarity times the freshness
//! multiplier stored in `metadata.freshness`. The multiplier halves every
//! configured half-life, never drops below the floor, and snaps to zero once
//! `valid_until` passes. `payload.sweep` selects store-wide mode; otherwise
//! `documentId` names a single target.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{instrument, warn};

use crate::job::Job;
use crate::model::{Document, metadata_keys};
use crate::processor::{Fault, JobProcessor, JobReport, ProcessorContext, ProcessorError};

/// `0.5^(age / half_life)`, clamped between `floor` and 1. A non-positive
/// half-life disables decay rather than dividing by zero.
pub(crate) fn decay_multiplier(age_days: f64, half_life_days: f64, floor: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let floor = floor.clamp(0.0, 1.0);
    let decayed = 0.5_f64.powf(age_days.max(0.0) / half_life_days);
    decayed.clamp(floor, 1.0)
}

fn age_in_days(ingested_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - ingested_at).num_seconds().max(0) as f64 / 86_400.0
}

/// Compute and persist one document's freshness slice. Returns the
/// multiplier that was written.
async fn apply_freshness(
    ctx: &ProcessorContext,
    document: &Document,
    now: DateTime<Utc>,
) -> Result<f64, ProcessorError> {
    let age_days = age_in_days(document.ingested_at, now);
    let expired = document.valid_until.is_some_and(|until| until <= now);
    let multiplier = if expired {
        0.0
    } else {
        decay_multiplier(
            age_days,
            ctx.config.freshness_half_life_days,
            ctx.config.freshness_floor,
        )
    };

    let patch = json!({
        (metadata_keys::FRESHNESS): {
            "multiplier": multiplier,
            "ageDays": age_days,
            "expired": expired,
            "computedAt": now,
        }
    });
    ctx.documents.update_metadata(&document.id, patch).await?;
    Ok(multiplier)
}

/// FRESHNESS job: recompute decay multipliers, for one document or for every
/// stale document in the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreshnessProcessor;

impl FreshnessProcessor {
    async fn refresh_one(
        &self,
        ctx: &ProcessorContext,
        document_id: &str,
    ) -> Result<JobReport, ProcessorError> {
        let document = ctx
            .documents
            .fetch_document(document_id)
            .await?
            .ok_or_else(|| ProcessorError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;

        let multiplier = apply_freshness(ctx, &document, Utc::now()).await?;
        ctx.emit_for_document(
            document_id,
            "freshness",
            format!("freshness multiplier {multiplier:.3}"),
        )?;
        Ok(JobReport::summary(format!(
            "freshness multiplier {multiplier:.3}"
        )))
    }

    /// Store-wide pass. One document failing must not starve the rest, so
    /// per-document errors become [`Fault`]s and the job still succeeds.
    async fn run_sweep(&self, ctx: &ProcessorContext) -> Result<JobReport, ProcessorError> {
        let now = Utc::now();
        let stale_before =
            now - Duration::seconds((ctx.config.freshness_stale_after_days * 86_400.0) as i64);
        let candidates = ctx.documents.sweep_candidates(stale_before, now).await?;
        if candidates.is_empty() {
            ctx.emit("freshness", "no stale documents to sweep")?;
            return Ok(JobReport::summary("no stale documents"));
        }

        let total = candidates.len();
        let mut faults = Vec::new();
        for document in &candidates {
            if let Err(error) = apply_freshness(ctx, document, now).await {
                warn!(document_id = %document.id, %error, "freshness sweep skipped a document");
                faults.push(Fault::sweep(&document.id, error.to_string()));
            }
        }

        let refreshed = total - faults.len();
        ctx.emit(
            "freshness",
            format!("swept {refreshed} of {total} stale documents"),
        )?;
        Ok(
            JobReport::summary(format!("refreshed {refreshed} of {total} stale documents"))
                .with_faults(faults),
        )
    }
}

#[async_trait]
impl JobProcessor for FreshnessProcessor {
    #[instrument(skip(self, job, ctx), fields(job_id = %ctx.job_id), err)]
    async fn process(
        &self,
        job: &Job,
        ctx: &ProcessorContext,
    ) -> Result<JobReport, ProcessorError> {
        if let Some(document_id) = job.document_id.as_deref() {
            return self.refresh_one(ctx, document_id).await;
        }
        if job.payload_flag("sweep") {
            return self.run_sweep(ctx).await;
        }
        Err(ProcessorError::Validation { field: "documentId" })
    }
}
