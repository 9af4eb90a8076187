//! External service clients: embeddings, chat completions, and web pages.
//!
//! Processors depend on the traits here, never on a concrete client, so
//! tests swap in scripted fakes and the pipeline can point at any
//! OpenAI-compatible endpoint. [`ProviderError::is_retryable`] is the
//! single place that decides whether a failure is worth retrying.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use url::Url;

use crate::budget::TokenUsage;

pub mod openai;
pub mod web;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use web::{PageIngestor, ScrapedPage};

/// Errors surfaced by provider clients.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// Non-success HTTP status from the provider. `retryable` is true for
    /// 429 and 5xx responses.
    #[error("provider request failed ({status}): {body}")]
    #[diagnostic(code(gleanforge::provider::status))]
    Status {
        status: u16,
        body: String,
        retryable: bool,
    },

    /// Transport-level failure: connect, timeout, body read, TLS.
    #[error("provider transport error: {source}")]
    #[diagnostic(code(gleanforge::provider::transport))]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    /// The provider answered 2xx but the payload is unusable.
    #[error("provider returned a malformed response: {detail}")]
    #[diagnostic(code(gleanforge::provider::malformed))]
    Malformed { detail: String },

    /// Embedding response did not line up with the request.
    #[error("embedding count mismatch: requested {requested}, returned {returned}")]
    #[diagnostic(code(gleanforge::provider::embedding_mismatch))]
    EmbeddingMismatch { requested: usize, returned: usize },

    /// Client construction was given unusable settings.
    #[error("invalid provider configuration: {detail}")]
    #[diagnostic(
        code(gleanforge::provider::config),
        help("check the API key and base URL settings")
    )]
    Config { detail: String },
}

impl ProviderError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed {
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// Whether retrying the same call later could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { retryable, .. } => *retryable,
            Self::Transport { source } => match source.status() {
                Some(status) => status.as_u16() == 429 || status.is_server_error(),
                None => {
                    source.is_timeout()
                        || source.is_connect()
                        || source.is_request()
                        || source.is_body()
                        || source.is_decode()
                }
            },
            Self::Malformed { .. } | Self::EmbeddingMismatch { .. } | Self::Config { .. } => false,
        }
    }
}

/// Vectors for one batch of inputs, in input order, plus settled usage.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub usage: TokenUsage,
    pub model: String,
}

/// One chat-completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Assistant text plus settled usage for one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Embedding endpoint seam. `model` is chosen per call so one client serves
/// both the regular embed pass and model migrations.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds `inputs`, returning one vector per input in input order.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<EmbeddingBatch, ProviderError>;
}

/// Chat-completion endpoint seam, used by the enrichment pass.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;
}

/// Web fetch seam for the scrape pass.
#[async_trait]
pub trait WebIngester: Send + Sync {
    /// Fetches `url` and extracts its title and readable text.
    async fn ingest(&self, url: &Url) -> Result<ScrapedPage, ProviderError>;
}
