//! ENRICH: extract structured metadata with a completion model.
//!
//! Enrichment is best-effort auxiliary metadata. Provider failures and
//! unparseable replies do not fail the job; they leave an error marker in
//! the document's `enrichment` metadata slice and the job settles as
//! complete. Budget denial is the exception: a denied call propagates as a
//! retryable error, never a silent skip.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use crate::budget::estimate_tokens;
use crate::event_bus::Event;
use crate::job::Job;
use crate::model::{ExtractedMetadata, metadata_keys};
use crate::processor::{Fault, JobProcessor, JobReport, ProcessorContext, ProcessorError};
use crate::providers::CompletionRequest;

const SYSTEM_PROMPT: &str =
    "You extract structured metadata from documents. Reply with a single JSON object and nothing else.";

fn build_prompt(content: &str, max_chars: usize) -> String {
    let excerpt: String = content.chars().take(max_chars).collect();
    format!(
        "Extract metadata from the document below. Reply with JSON matching:\n\
         {{\"entities\": [\"...\"], \"topics\": [\"...\"], \"summary\": \"...\", \"language\": \"...\"}}\n\
         \n\
         - entities: proper nouns worth indexing (people, organizations, products, places)\n\
         - topics: three to eight short subject labels\n\
         - summary: at most three sentences\n\
         - language: ISO 639-1 code of the document language\n\
         \n\
         Document:\n{excerpt}"
    )
}

/// Parses the model's reply into [`ExtractedMetadata`], repairing the two
/// failure shapes chat models actually produce: a fenced code block around
/// the JSON, and prose around a JSON object.
pub(crate) fn parse_extraction(reply: &str) -> Result<ExtractedMetadata, serde_json::Error> {
    let trimmed = reply.trim();
    if let Ok(parsed) = serde_json::from_str(trimmed) {
        return Ok(parsed);
    }
    let unfenced = strip_code_fences(trimmed);
    if let Ok(parsed) = serde_json::from_str(unfenced) {
        return Ok(parsed);
    }
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&unfenced[start..=end]),
        _ => serde_json::from_str(unfenced),
    }
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") up to the first newline.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// ENRICH job: ask the completion model for entities, topics, summary, and
/// language, and merge the result into the document's metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnrichProcessor;

impl EnrichProcessor {
    /// Records a soft failure: marker into metadata, fault onto the report.
    /// The marker write itself must succeed, otherwise the failure would be
    /// invisible and the job must not settle.
    async fn soft_failure(
        &self,
        ctx: &ProcessorContext,
        document_id: &str,
        message: String,
    ) -> Result<JobReport, ProcessorError> {
        let marker = json!({
            (metadata_keys::ENRICHMENT): {
                "error": {
                    "message": message,
                    "failedAt": Utc::now(),
                },
            },
        });
        ctx.documents.update_metadata(document_id, marker).await?;
        ctx.emit_for_document(
            document_id,
            "enrich",
            format!("enrichment failed, marker recorded: {message}"),
        )?;
        Ok(JobReport::summary("enrichment failed; error marker recorded")
            .with_fault(Fault::enrichment(document_id, message)))
    }
}

#[async_trait]
impl JobProcessor for EnrichProcessor {
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
            ctx.emit_for_document(document_id, "enrich", "no content; nothing to enrich")?;
            return Ok(JobReport::summary("nothing to enrich"));
        }

        let prompt = build_prompt(&document.content, ctx.config.enrich_max_chars);
        ctx.budget.check_cost_budget()?;
        let reservation = ctx.budget.check_token_budget(estimate_tokens(&prompt))?;

        let request = CompletionRequest::new(&ctx.config.completion_model, prompt)
            .with_system(SYSTEM_PROMPT)
            .with_temperature(0.0);

        let completion = match ctx.completions.complete(request).await {
            Ok(completion) => completion,
            Err(provider_error) => {
                ctx.budget.release(reservation);
                let message = format!("completion failed: {provider_error}");
                return self.soft_failure(ctx, document_id, message).await;
            }
        };

        let cost = ctx
            .budget
            .record_usage(reservation, &completion.model, &completion.usage);
        ctx.emit_event(Event::provider_usage(
            "enrichment",
            completion.model.clone(),
            completion.usage,
            cost,
        ))?;

        let extracted = match parse_extraction(&completion.content) {
            Ok(extracted) => extracted,
            Err(parse_error) => {
                let message = format!("reply was not valid extraction JSON: {parse_error}");
                return self.soft_failure(ctx, document_id, message).await;
            }
        };

        let summary = format!(
            "extracted {} entities, {} topics",
            extracted.entities.len(),
            extracted.topics.len()
        );
        let patch = json!({
            (metadata_keys::ENRICHMENT): {
                "entities": extracted.entities,
                "topics": extracted.topics,
                "summary": extracted.summary,
                "language": extracted.language,
                "model": completion.model,
                "extractedAt": Utc::now(),
                "error": null,
            },
        });
        ctx.documents.update_metadata(document_id, patch).await?;

        ctx.emit_for_document(document_id, "enrich", summary.clone())?;
        Ok(JobReport::summary(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bare_json_reply() {
        let parsed = parse_extraction(
            r#"{"entities": ["Rust"], "topics": ["programming"], "summary": "s", "language": "en"}"#,
        )
        .unwrap();
        assert_eq!(parsed.entities, vec!["Rust"]);
        assert_eq!(parsed.language.as_deref(), Some("en"));
    }

    #[test]
    fn strips_markdown_fences() {
        let reply = "```json\n{\"topics\": [\"databases\"]}\n```";
        let parsed = parse_extraction(reply).unwrap();
        assert_eq!(parsed.topics, vec!["databases"]);
        assert!(parsed.entities.is_empty());
    }

    #[test]
    fn slices_json_out_of_prose() {
        let reply = "Sure! Here is the metadata you asked for:\n{\"summary\": \"a digest\"}\nLet me know if you need more.";
        let parsed = parse_extraction(reply).unwrap();
        assert_eq!(parsed.summary.as_deref(), Some("a digest"));
    }

    #[test]
    fn pure_prose_fails_to_parse() {
        assert!(parse_extraction("I could not process this document.").is_err());
    }

    #[test]
    fn prompt_truncates_long_documents() {
        let content = "x".repeat(10_000);
        let prompt = build_prompt(&content, 100);
        assert!(prompt.len() < 1_000);
        assert!(prompt.contains(&"x".repeat(100)));
        assert!(!prompt.contains(&"x".repeat(101)));
    }
}
