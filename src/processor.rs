//! Processor execution framework for the ingestion pipeline.
//!
//! This module provides the core abstractions for job processors: the
//! [`JobProcessor`] trait, the execution context handed to each job, the
//! [`JobReport`] a processor returns, and the error taxonomy that decides
//! whether a failed job is retried or dead-lettered.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::budget::{BudgetError, BudgetGuard};
use crate::event_bus::{EmitterError, Event, EventEmitter};
use crate::ingest::PersistenceService;
use crate::job::Job;
use crate::providers::{CompletionClient, EmbeddingClient, ProviderError, WebIngester};
use crate::runtimes::RuntimeConfig;
use crate::stores::{ChunkStore, DocumentStore, JobQueue, StoreError};
use crate::types::JobKind;

/// Core trait defining a pipeline job processor.
///
/// A processor is a single unit of pipeline work: it receives the job payload
/// and an execution context, reads and writes the stores through the context,
/// and returns a [`JobReport`] describing what happened.
///
/// # Error Handling
///
/// Processors distinguish two failure shapes:
/// 1. **Hard failures**: return `Err(ProcessorError)`; the worker retries or
///    dead-letters the job based on [`ProcessorError::is_retryable`].
/// 2. **Soft failures**: push a [`Fault`] onto the report and return `Ok`.
///    The job settles as complete; the fault is logged and, where the
///    processor chose to, mirrored into document metadata.
///
/// Delivery is at-least-once, so every processor must be safely re-runnable
/// on the same input.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Execute one job to completion.
    async fn process(&self, job: &Job, ctx: &ProcessorContext)
    -> Result<JobReport, ProcessorError>;
}

/// Execution context passed to processors.
///
/// Carries the shared pipeline resources (stores, provider clients, budget
/// guard, persistence path, configuration) plus the identity of the job being
/// executed, so emitted events are traceable back to their queue entry.
#[derive(Clone)]
pub struct ProcessorContext {
    pub documents: Arc<dyn DocumentStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub queue: Arc<dyn JobQueue>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub completions: Arc<dyn CompletionClient>,
    pub web: Arc<dyn WebIngester>,
    pub budget: Arc<BudgetGuard>,
    pub persistence: Arc<PersistenceService>,
    pub config: Arc<RuntimeConfig>,
    pub emitter: Arc<dyn EventEmitter>,
    /// Queue id of the job currently executing.
    pub job_id: String,
    /// Kind of the job currently executing.
    pub job_kind: JobKind,
}

impl std::fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("job_id", &self.job_id)
            .field("job_kind", &self.job_kind)
            .finish_non_exhaustive()
    }
}

impl ProcessorContext {
    /// Clone of this context rebound to another job's identity. The worker
    /// builds one base context at startup and rebinds it per claimed job.
    #[must_use]
    pub fn for_job(&self, job_id: impl Into<String>, kind: JobKind) -> Self {
        let mut ctx = self.clone();
        ctx.job_id = job_id.into();
        ctx.job_kind = kind;
        ctx
    }

    /// Emit a job-scoped event enriched with this context's job identity.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), EmitterError> {
        self.emitter.emit(Event::job_message(
            self.job_id.clone(),
            self.job_kind,
            scope,
            message,
        ))
    }

    /// Emit a job-scoped event tied to a specific document.
    pub fn emit_for_document(
        &self,
        document_id: impl Into<String>,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), EmitterError> {
        self.emitter.emit(Event::job_message_for_document(
            self.job_id.clone(),
            self.job_kind,
            document_id,
            scope,
            message,
        ))
    }

    /// Emit a pre-built event, e.g. provider usage after settling a call.
    pub fn emit_event(&self, event: Event) -> Result<(), EmitterError> {
        self.emitter.emit(event)
    }
}

/// Outcome of a successfully settled job.
///
/// All fields are optional extras over the bare "it worked": follow-on jobs
/// the worker should enqueue, and soft [`Fault`]s that occurred without
/// failing the job.
#[derive(Clone, Debug, Default)]
pub struct JobReport {
    /// One-line human summary, logged and emitted on completion.
    pub summary: String,
    /// Jobs to enqueue now that this one has succeeded.
    pub follow_on: Vec<Job>,
    /// Soft failures that did not fail the job.
    pub faults: Vec<Fault>,
}

impl JobReport {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_follow_on(mut self, jobs: Vec<Job>) -> Self {
        self.follow_on = jobs;
        self
    }

    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    #[must_use]
    pub fn with_faults(mut self, faults: Vec<Fault>) -> Self {
        self.faults = faults;
        self
    }

    /// True when the job did its work but some best-effort piece failed.
    pub fn is_partial(&self) -> bool {
        !self.faults.is_empty()
    }
}

/// A soft failure carried inside a successful [`JobReport`].
///
/// Serializes with a tagged `stage` discriminator so fault records written
/// into document metadata stay machine-readable:
///
/// ```json
/// {
///   "when": "2026-08-23T10:30:00Z",
///   "stage": { "stage": "embedding", "document_id": "doc-1" },
///   "message": "budget denied",
///   "context": { "chunks": 4 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fault {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    pub stage: FaultStage,
    pub message: String,
    #[serde(default)]
    pub context: Value,
}

impl Fault {
    pub fn embedding(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(
            FaultStage::Embedding {
                document_id: document_id.into(),
            },
            message,
        )
    }

    pub fn enrichment(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(
            FaultStage::Enrichment {
                document_id: document_id.into(),
            },
            message,
        )
    }

    pub fn sweep(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(
            FaultStage::Sweep {
                document_id: document_id.into(),
            },
            message,
        )
    }

    pub fn ingest(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(
            FaultStage::Ingest {
                document_id: document_id.into(),
            },
            message,
        )
    }

    fn at(stage: FaultStage, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            stage,
            message: message.into(),
            context: Value::Null,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Document the fault concerns, for per-document reporting.
    pub fn document_id(&self) -> &str {
        match &self.stage {
            FaultStage::Embedding { document_id }
            | FaultStage::Enrichment { document_id }
            | FaultStage::Sweep { document_id }
            | FaultStage::Ingest { document_id } => document_id,
        }
    }
}

/// Pipeline stage a [`Fault`] occurred in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum FaultStage {
    Embedding { document_id: String },
    Enrichment { document_id: String },
    Sweep { document_id: String },
    Ingest { document_id: String },
}

/// Errors that fail a job outright.
///
/// The worker consults [`ProcessorError::is_retryable`]: retryable errors go
/// back to the queue with backoff until the attempt cap, everything else
/// dead-letters immediately. Soft failures never appear here; they ride in
/// [`JobReport::faults`].
#[derive(Debug, Error, Diagnostic)]
pub enum ProcessorError {
    /// A required payload field is missing. Terminal: retrying cannot supply
    /// the field.
    #[error("missing required payload field: {field}")]
    #[diagnostic(
        code(gleanforge::processor::validation),
        help("The enqueuing side must set this field; check the job constructor used.")
    )]
    Validation { field: &'static str },

    /// A payload field is present but unusable.
    #[error("invalid payload field `{field}`: {message}")]
    #[diagnostic(code(gleanforge::processor::invalid_field))]
    InvalidField {
        field: &'static str,
        message: String,
    },

    /// The target document no longer exists. Terminal: log and drop.
    #[error("document not found: {document_id}")]
    #[diagnostic(
        code(gleanforge::processor::document_not_found),
        help("The document was deleted after the job was enqueued; the job is dropped.")
    )]
    DocumentNotFound { document_id: String },

    /// Budget guard denied a paid call. Retryable: the budget may be reset
    /// or raised before the next attempt.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Budget(#[from] BudgetError),

    /// Provider call failed; retryability follows the provider's own
    /// classification (429/5xx/transport yes, 4xx no).
    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    /// Store operation failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// Event could not be emitted to the bus.
    #[error("event bus error: {0}")]
    #[diagnostic(code(gleanforge::processor::event_bus))]
    EventBus(#[from] EmitterError),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    #[diagnostic(code(gleanforge::processor::serde_json))]
    Serde(#[from] serde_json::Error),
}

impl ProcessorError {
    /// Whether the queue should redeliver the job with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessorError::Budget(_) => true,
            ProcessorError::Provider(provider) => provider.is_retryable(),
            ProcessorError::Store(store) => matches!(store, StoreError::Backend { .. }),
            ProcessorError::Validation { .. }
            | ProcessorError::InvalidField { .. }
            | ProcessorError::DocumentNotFound { .. }
            | ProcessorError::EventBus(_)
            | ProcessorError::Serde(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_builders_accumulate() {
        let report = JobReport::summary("embedded 4 chunks")
            .with_follow_on(vec![Job::dedup_check("doc-1")])
            .with_fault(Fault::embedding("doc-1", "one chunk failed"));
        assert_eq!(report.summary, "embedded 4 chunks");
        assert_eq!(report.follow_on.len(), 1);
        assert!(report.is_partial());
    }

    #[test]
    fn fault_serializes_with_stage_tag() {
        let fault = Fault::enrichment("doc-7", "model returned prose")
            .with_context(json!({"attempt": 1}));
        let value = serde_json::to_value(&fault).unwrap();
        assert_eq!(value["stage"]["stage"], "enrichment");
        assert_eq!(value["stage"]["document_id"], "doc-7");
        assert_eq!(value["message"], "model returned prose");
        assert_eq!(value["context"]["attempt"], 1);
    }

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(ProcessorError::Budget(BudgetError::TokensExhausted {
            requested: 100,
            remaining: 10,
        })
        .is_retryable());
        assert!(ProcessorError::Store(StoreError::backend("connection reset")).is_retryable());
        assert!(!ProcessorError::Validation { field: "url" }.is_retryable());
        assert!(!ProcessorError::DocumentNotFound {
            document_id: "doc-1".into(),
        }
        .is_retryable());
        assert!(!ProcessorError::Store(StoreError::corrupt("bad vector json")).is_retryable());
    }

    #[test]
    fn provider_retryability_passes_through() {
        let throttled = ProviderError::Status {
            status: 429,
            body: "slow down".into(),
            retryable: true,
        };
        assert!(ProcessorError::Provider(throttled).is_retryable());

        let rejected = ProviderError::Status {
            status: 400,
            body: "bad request".into(),
            retryable: false,
        };
        assert!(!ProcessorError::Provider(rejected).is_retryable());
    }
}
