//! Async client for OpenAI-compatible embedding and chat endpoints.
//!
//! One client serves both traits: embeddings chunk their inputs into
//! size-limited batches, completions send a single chat exchange. Transient
//! failures (429, 5xx, transport) retry with exponential backoff before
//! surfacing; everything else fails fast.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::instrument;

use super::{
    Completion, CompletionClient, CompletionRequest, EmbeddingBatch, EmbeddingClient, ProviderError,
};
use crate::budget::TokenUsage;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Settings for [`OpenAiClient`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Total attempts per request, including the first.
    pub max_retries: usize,
    /// Maximum inputs per embeddings request; longer batches are split.
    pub batch_size: usize,
    /// Requested output dimensions, when the endpoint supports truncation.
    pub dimensions: Option<usize>,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
            batch_size: 64,
            dimensions: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// HTTP client for `/embeddings` and `/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    embeddings_url: String,
    completions_url: String,
    max_retries: usize,
    batch_size: usize,
    dimensions: Option<usize>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::config("missing API key"));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        let auth_value = HeaderValue::from_str(&auth)
            .map_err(|_| ProviderError::config("API key contains invalid header characters"))?;
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            embeddings_url: format!("{base}/embeddings"),
            completions_url: format!("{base}/chat/completions"),
            max_retries: config.max_retries.max(1),
            batch_size: config.batch_size.max(1),
            dimensions: config.dimensions,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn post_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T, ProviderError> {
        let mut attempt = 0usize;
        loop {
            match self.client.post(url).json(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<T>()
                            .await
                            .map_err(|e| ProviderError::malformed(e.to_string()));
                    }

                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    let body_text = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if retryable && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(ProviderError::Status {
                        status: status.as_u16(),
                        body: body_text,
                        retryable,
                    });
                }
                Err(err) => {
                    let provider_err = ProviderError::from(err);
                    if provider_err.is_retryable() && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(provider_err);
                }
            }
        }
    }
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    #[instrument(skip(self, inputs), fields(inputs = inputs.len()), err)]
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<EmbeddingBatch, ProviderError> {
        if inputs.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                usage: TokenUsage::default(),
                model: model.to_string(),
            });
        }

        let mut vectors = Vec::with_capacity(inputs.len());
        let mut usage = TokenUsage::default();

        for batch in inputs.chunks(self.batch_size) {
            let request = EmbeddingWireRequest {
                model,
                input: batch,
                dimensions: self.dimensions,
            };
            let mut parsed: EmbeddingWireResponse =
                self.post_with_retry(&self.embeddings_url, &request).await?;

            // Responses are not guaranteed to preserve input order.
            parsed.data.sort_by_key(|entry| entry.index);
            if parsed.data.len() != batch.len() {
                return Err(ProviderError::EmbeddingMismatch {
                    requested: batch.len(),
                    returned: parsed.data.len(),
                });
            }
            if let Some(dims) = self.dimensions {
                for entry in &parsed.data {
                    if entry.embedding.len() != dims {
                        return Err(ProviderError::malformed(format!(
                            "embedding has {} dimensions, expected {dims}",
                            entry.embedding.len()
                        )));
                    }
                }
            }

            if let Some(batch_usage) = parsed.usage {
                usage.prompt_tokens += batch_usage.prompt_tokens;
                usage.completion_tokens += batch_usage.completion_tokens;
            }
            vectors.extend(parsed.data.into_iter().map(|entry| entry.embedding));
        }

        Ok(EmbeddingBatch {
            vectors,
            usage,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    #[instrument(skip(self, request), fields(model = %request.model), err)]
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatWireRequest {
            model: &request.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages,
        };
        let parsed: ChatWireResponse = self.post_with_retry(&self.completions_url, &body).await?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::malformed("chat response had no choices"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            content,
            usage,
            model: parsed.model.unwrap_or(request.model),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingWireRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingWireResponse {
    data: Vec<EmbeddingWireEntry>,
    usage: Option<UsageWire>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingWireEntry {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Serialize)]
struct ChatWireRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatWireResponse {
    choices: Vec<ChatWireChoice>,
    usage: Option<UsageWire>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatWireChoice {
    message: ChatWireMessage,
}

#[derive(Debug, Deserialize)]
struct ChatWireMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct UsageWire {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
