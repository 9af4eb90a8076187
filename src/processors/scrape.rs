//! SCRAPE: fetch a URL, extract its text, persist it as a document.
//!
//! Persistence goes through the same [`PersistenceService`] path as direct
//! uploads, so exact-duplicate rejection and follow-on enqueueing behave
//! identically. A content-hash hit is a success with a note, not an error;
//! scraping the same page twice should be boring.
//!
//! [`PersistenceService`]: crate::ingest::PersistenceService

use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;
use url::Url;

use crate::ingest::PersistInput;
use crate::job::Job;
use crate::processor::{Fault, JobProcessor, JobReport, ProcessorContext, ProcessorError};

/// SCRAPE job: `payload.url` names the page to ingest. The URL is validated
/// before any network traffic happens.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScrapeProcessor;

#[async_trait]
impl JobProcessor for ScrapeProcessor {
    #[instrument(skip(self, job, ctx), fields(job_id = %ctx.job_id), err)]
    async fn process(
        &self,
        job: &Job,
        ctx: &ProcessorContext,
    ) -> Result<JobReport, ProcessorError> {
        let raw_url = job
            .payload_str("url")
            .ok_or(ProcessorError::Validation { field: "url" })?;
        let url = Url::parse(raw_url).map_err(|error| ProcessorError::InvalidField {
            field: "url",
            message: error.to_string(),
        })?;

        let page = ctx.web.ingest(&url).await?;
        // Redirects may land elsewhere; the final URL is the canonical one.
        let source_uri = page.url.to_string();
        let title = page.title.clone().unwrap_or_else(|| source_uri.clone());
        let input = PersistInput::text(title, page.text)
            .with_raw_content(page.html.into_bytes())
            .with_source_uri(source_uri.as_str())
            .with_metadata(json!({
                "sourceType": "web",
                "mimeType": "text/html",
                "fetchedAt": page.fetched_at,
            }));

        let receipt = ctx.persistence.persist_document(input).await?;
        if receipt.duplicate {
            ctx.emit_for_document(
                &receipt.document_id,
                "scrape",
                format!("{source_uri} already ingested as {}", receipt.document_id),
            )?;
            return Ok(JobReport::summary(format!(
                "{source_uri} already ingested; nothing to do"
            )));
        }

        let queued = ctx.persistence.enqueue_post_persist_jobs(&receipt).await?;
        ctx.emit_for_document(
            &receipt.document_id,
            "scrape",
            format!(
                "scraped {source_uri} into {} ({} chunks, {} follow-on jobs)",
                receipt.document_id,
                receipt.chunks_created,
                queued.len()
            ),
        )?;

        let mut report = JobReport::summary(format!(
            "scraped {source_uri} into {}",
            receipt.document_id
        ));
        if receipt.partial_failure {
            report = report.with_fault(Fault::ingest(
                &receipt.document_id,
                "embedding deferred to a queued EMBED job",
            ));
        }
        Ok(report)
    }
}
