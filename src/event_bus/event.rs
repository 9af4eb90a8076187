use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::budget::TokenUsage;
use crate::types::JobKind;

/// A structured pipeline event, fanned out to every sink on the bus.
///
/// Three variants cover the pipeline's observable activity: `Job` for
/// processor progress, `Provider` for paid API usage, and `Diagnostic` for
/// everything else.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Event {
    Job(JobEvent),
    Provider(ProviderEvent),
    Diagnostic(DiagnosticEvent),
}

impl Event {
    pub fn job_message(
        job_id: impl Into<String>,
        kind: JobKind,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Job(JobEvent::new(
            job_id.into(),
            kind,
            None,
            scope.into(),
            message.into(),
        ))
    }

    pub fn job_message_for_document(
        job_id: impl Into<String>,
        kind: JobKind,
        document_id: impl Into<String>,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Job(JobEvent::new(
            job_id.into(),
            kind,
            Some(document_id.into()),
            scope.into(),
            message.into(),
        ))
    }

    /// Records settled usage for one paid provider call.
    pub fn provider_usage(
        scope: impl Into<String>,
        model: impl Into<String>,
        usage: TokenUsage,
        cost_usd: f64,
    ) -> Self {
        let model = model.into();
        let message = format!(
            "{} prompt + {} completion tokens (${cost_usd:.6})",
            usage.prompt_tokens, usage.completion_tokens
        );
        Event::Provider(ProviderEvent {
            scope: scope.into(),
            model,
            usage,
            cost_usd,
            message,
        })
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    pub fn scope_label(&self) -> Option<&str> {
        match self {
            Event::Job(job) => Some(job.scope()),
            Event::Provider(provider) => Some(provider.scope()),
            Event::Diagnostic(diag) => Some(diag.scope()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Event::Job(job) => job.message(),
            Event::Provider(provider) => provider.message(),
            Event::Diagnostic(diag) => diag.message(),
        }
    }

    /// Renders the event as a normalized JSON object:
    /// `{type, scope, message, timestamp, metadata}` with variant-specific
    /// fields under `metadata`.
    pub fn to_json_value(&self) -> Value {
        let (event_type, metadata) = match self {
            Event::Job(job) => {
                let mut meta = serde_json::Map::new();
                meta.insert("job_id".to_string(), json!(job.job_id()));
                meta.insert("kind".to_string(), json!(job.kind().encode()));
                if let Some(document_id) = job.document_id() {
                    meta.insert("document_id".to_string(), json!(document_id));
                }
                ("job", Value::Object(meta))
            }
            Event::Provider(provider) => {
                let mut meta = serde_json::Map::new();
                meta.insert("model".to_string(), json!(provider.model()));
                meta.insert(
                    "prompt_tokens".to_string(),
                    json!(provider.usage().prompt_tokens),
                );
                meta.insert(
                    "completion_tokens".to_string(),
                    json!(provider.usage().completion_tokens),
                );
                meta.insert("cost_usd".to_string(), json!(provider.cost_usd()));
                ("provider", Value::Object(meta))
            }
            Event::Diagnostic(_) => ("diagnostic", Value::Object(serde_json::Map::new())),
        };

        json!({
            "type": event_type,
            "scope": self.scope_label(),
            "message": self.message(),
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": metadata,
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Job(job) => match job.document_id() {
                Some(doc) => write!(f, "[{}:{} {doc}] {}", job.kind(), job.job_id(), job.message()),
                None => write!(f, "[{}:{}] {}", job.kind(), job.job_id(), job.message()),
            },
            Event::Provider(provider) => {
                write!(f, "[{}] {}", provider.model(), provider.message())
            }
            Event::Diagnostic(diag) => write!(f, "{}", diag.message()),
        }
    }
}

/// Progress or outcome of one queued job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobEvent {
    job_id: String,
    kind: JobKind,
    document_id: Option<String>,
    scope: String,
    message: String,
}

impl JobEvent {
    pub fn new(
        job_id: String,
        kind: JobKind,
        document_id: Option<String>,
        scope: String,
        message: String,
    ) -> Self {
        Self {
            job_id,
            kind,
            document_id,
            scope,
            message,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Settled token usage and priced cost for one provider call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProviderEvent {
    scope: String,
    model: String,
    usage: TokenUsage,
    cost_usd: f64,
    message: String,
}

impl ProviderEvent {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    scope: String,
    message: String,
}

impl DiagnosticEvent {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
