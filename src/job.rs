//! Queue job payloads and retry timing.
//!
//! A [`Job`] is what callers enqueue: a [`JobKind`], an optional target
//! document, and a JSON payload for kind-specific arguments. The queue wraps
//! it in a [`QueuedJob`] envelope that carries delivery state (id, attempt
//! count, visibility time). Payload keys use camelCase, matching the wire
//! shape of scrape requests and receipts.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

use crate::types::JobKind;

/// One unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub kind: JobKind,
    /// Target document. `None` for jobs that are not document-scoped
    /// (scrapes create their document; freshness sweeps the whole store).
    pub document_id: Option<String>,
    /// Kind-specific arguments as a JSON object.
    pub payload: Value,
}

impl Job {
    pub fn new(kind: JobKind, document_id: Option<String>) -> Self {
        Self {
            kind,
            document_id,
            payload: json!({}),
        }
    }

    /// Chunk and embed a document with its configured strategy.
    pub fn embed(document_id: impl Into<String>) -> Self {
        Self::new(JobKind::Embed, Some(document_id.into()))
    }

    /// Extract structured metadata for a document.
    pub fn enrich(document_id: impl Into<String>) -> Self {
        Self::new(JobKind::Enrich, Some(document_id.into()))
    }

    /// Compare a document's primary vector against its peers.
    pub fn dedup_check(document_id: impl Into<String>) -> Self {
        Self::new(JobKind::DedupCheck, Some(document_id.into()))
    }

    /// Re-embed a document under a different model.
    pub fn re_embed(document_id: impl Into<String>, new_model_id: impl Into<String>) -> Self {
        Self::new(JobKind::ReEmbed, Some(document_id.into()))
            .with_payload(json!({ "newModelId": new_model_id.into() }))
    }

    /// Sweep the store, recomputing freshness for stale documents.
    pub fn freshness_sweep() -> Self {
        Self::new(JobKind::Freshness, None).with_payload(json!({ "sweep": true }))
    }

    /// Recompute the freshness multiplier for one document.
    pub fn freshness(document_id: impl Into<String>) -> Self {
        Self::new(JobKind::Freshness, Some(document_id.into()))
    }

    /// Fetch a URL and persist it as a document.
    pub fn scrape(url: impl Into<String>) -> Self {
        Self::new(JobKind::Scrape, None).with_payload(json!({ "url": url.into() }))
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// String payload field, if present and a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Boolean payload field; absent or non-boolean reads as `false`.
    pub fn payload_flag(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A job as held by the queue: the payload plus delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub job: Job,
    /// Completed delivery attempts so far; zero on first claim.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Visibility time for delayed retries. `None` means immediately ready.
    pub not_before: Option<DateTime<Utc>>,
}

impl QueuedJob {
    pub fn kind(&self) -> JobKind {
        self.job.kind
    }

    pub fn document_id(&self) -> Option<&str> {
        self.job.document_id.as_deref()
    }
}

/// Exponential backoff schedule for transient job failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts before a job is dead-lettered.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// [`Self::delay_for`] plus up to 25% random jitter, so workers retrying
    /// the same burst of failures do not wake in lockstep.
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let jitter_ceiling = (delay.as_millis() / 4) as u64;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ceiling)
        };
        (delay + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind_and_payload() {
        let job = Job::re_embed("doc-1", "text-embedding-3-large");
        assert_eq!(job.kind, JobKind::ReEmbed);
        assert_eq!(job.document_id.as_deref(), Some("doc-1"));
        assert_eq!(job.payload_str("newModelId"), Some("text-embedding-3-large"));

        let scrape = Job::scrape("https://example.com/page");
        assert_eq!(scrape.kind, JobKind::Scrape);
        assert!(scrape.document_id.is_none());
        assert_eq!(scrape.payload_str("url"), Some("https://example.com/page"));
    }

    #[test]
    fn payload_str_ignores_non_strings() {
        let job = Job::embed("doc-1").with_payload(json!({ "count": 3 }));
        assert_eq!(job.payload_str("count"), None);
        assert_eq!(job.payload_str("missing"), None);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        // Past the cap every attempt waits max_delay.
        assert_eq!(policy.delay_for(10), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        let base = policy.delay_for(2);
        for _ in 0..32 {
            let jittered = policy.jittered_delay_for(2);
            assert!(jittered >= base);
            assert!(jittered <= base + base / 4);
        }
    }
}
