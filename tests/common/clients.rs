//! Scripted provider doubles: deterministic embeddings, queued completion
//! replies, and a canned web page. Each records the calls it served so
//! tests can assert on what reached the provider seam.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use url::Url;

use gleanforge::budget::{TokenUsage, estimate_tokens};
use gleanforge::providers::{
    Completion, CompletionClient, CompletionRequest, EmbeddingBatch, EmbeddingClient,
    ProviderError, ScrapedPage, WebIngester,
};

fn scripted_outage() -> ProviderError {
    ProviderError::Status {
        status: 503,
        body: "scripted outage".to_string(),
        retryable: true,
    }
}

/// Embedding double. Every input maps to a stable unit vector derived from
/// its bytes, so equal text embeds identically across calls. Tests can also
/// queue explicit batches (to force a count mismatch, say) or a number of
/// retryable outages.
#[derive(Debug, Default)]
pub struct ScriptedEmbeddings {
    batches: Mutex<VecDeque<Vec<Vec<f32>>>>,
    outages: AtomicUsize,
    calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an explicit batch, served ahead of the derived vectors.
    pub fn push_batch(&self, vectors: Vec<Vec<f32>>) {
        self.batches.lock().push_back(vectors);
    }

    /// Fails the next `n` calls with a retryable 503.
    pub fn fail_times(&self, n: usize) {
        self.outages.store(n, Ordering::SeqCst);
    }

    /// `(model, input_count)` per served call, in order.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// The stable unit vector the double derives for `text`.
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut acc = [0.0f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            acc[i % 8] += f32::from(byte);
        }
        let norm = acc.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
        acc.iter().map(|v| v / norm).collect()
    }
}

#[async_trait]
impl EmbeddingClient for ScriptedEmbeddings {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<EmbeddingBatch, ProviderError> {
        self.calls.lock().push((model.to_string(), inputs.len()));
        let outage = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(scripted_outage());
        }
        let vectors = match self.batches.lock().pop_front() {
            Some(batch) => batch,
            None => inputs.iter().map(|text| Self::vector_for(text)).collect(),
        };
        let tokens: u64 = inputs.iter().map(|text| estimate_tokens(text)).sum();
        Ok(EmbeddingBatch {
            vectors,
            usage: TokenUsage::prompt_only(tokens),
            model: model.to_string(),
        })
    }
}

/// A well-formed extraction reply, the double's happy-path default.
pub const VALID_EXTRACTION: &str = r#"{"entities": ["Tokio", "Rust"], "topics": ["async", "runtimes"], "summary": "An async runtime overview.", "language": "en"}"#;

#[derive(Debug)]
enum CompletionScript {
    Reply(String),
    Outage,
}

/// Completion double; queued replies play back in order, and with nothing
/// queued it serves [`VALID_EXTRACTION`]. Records every request.
#[derive(Debug, Default)]
pub struct ScriptedCompletions {
    script: Mutex<VecDeque<CompletionScript>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script
            .lock()
            .push_back(CompletionScript::Reply(reply.into()));
    }

    /// Fails the next call with a retryable 503.
    pub fn fail_next(&self) {
        self.script.lock().push_back(CompletionScript::Outage);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletions {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        let content = match next {
            Some(CompletionScript::Outage) => return Err(scripted_outage()),
            Some(CompletionScript::Reply(reply)) => reply,
            None => VALID_EXTRACTION.to_string(),
        };
        Ok(Completion {
            usage: TokenUsage::new(estimate_tokens(&request.prompt), estimate_tokens(&content)),
            model: request.model.clone(),
            content,
        })
    }
}

#[derive(Debug, Clone)]
struct StubPage {
    title: Option<String>,
    text: String,
    html: String,
}

/// Web fetch double serving one configured page. Records every requested
/// URL, so validation tests can assert that nothing reached the network.
#[derive(Debug, Default)]
pub struct StubWeb {
    page: Mutex<Option<StubPage>>,
    requests: Mutex<Vec<Url>>,
}

impl StubWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, title: Option<&str>, text: &str, html: &str) {
        *self.page.lock() = Some(StubPage {
            title: title.map(str::to_string),
            text: text.to_string(),
            html: html.to_string(),
        });
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl WebIngester for StubWeb {
    async fn ingest(&self, url: &Url) -> Result<ScrapedPage, ProviderError> {
        self.requests.lock().push(url.clone());
        let page = self.page.lock().clone();
        match page {
            Some(page) => Ok(ScrapedPage {
                url: url.clone(),
                title: page.title,
                text: page.text,
                html: page.html,
                fetched_at: Utc::now(),
            }),
            None => Err(ProviderError::Status {
                status: 404,
                body: "no page configured".to_string(),
                retryable: false,
            }),
        }
    }
}
