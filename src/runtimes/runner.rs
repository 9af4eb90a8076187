//! Pipeline assembly and lifecycle.
//!
//! [`PipelineBuilder`] wires stores, provider clients, budget, and event bus
//! into a running [`PipelineRunner`]: a worker pool plus the ingestion
//! entry points. One builder call chain replaces hand-assembling a
//! [`ProcessorContext`], which is still the right tool inside unit tests.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::budget::{BudgetGuard, PricingTable};
use crate::event_bus::{EventBus, EventEmitter};
use crate::ingest::{IngestError, PersistInput, PersistReceipt, PersistenceService};
use crate::job::Job;
use crate::processor::ProcessorContext;
use crate::providers::{
    CompletionClient, EmbeddingClient, OpenAiClient, PageIngestor, ProviderError, WebIngester,
};
use crate::runtimes::config::RuntimeConfig;
use crate::runtimes::worker::WorkerPool;
use crate::stores::{
    ChunkStore, DeadLetter, DocumentStore, JobQueue, MemoryStore, QueueDepth, StoreError,
};
use crate::types::JobKind;

/// Failures assembling or driving a [`PipelineRunner`].
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error("pipeline builder is missing a collaborator: {name}")]
    #[diagnostic(
        code(gleanforge::runner::missing_collaborator),
        help("wire it with the matching PipelineBuilder::with_* call")
    )]
    MissingCollaborator { name: &'static str },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),
}

/// Assembles a [`PipelineRunner`].
///
/// Stores default to one shared [`MemoryStore`]; embedding and completion
/// clients have no default and must be wired explicitly. The web ingester
/// defaults to [`PageIngestor`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: RuntimeConfig,
    documents: Option<Arc<dyn DocumentStore>>,
    chunks: Option<Arc<dyn ChunkStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    embeddings: Option<Arc<dyn EmbeddingClient>>,
    completions: Option<Arc<dyn CompletionClient>>,
    web: Option<Arc<dyn WebIngester>>,
    event_bus: Option<EventBus>,
    pricing: Option<PricingTable>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// One backend serving documents, chunks, and the queue. Splitting the
    /// three across backends is possible through the individual setters, but
    /// dedup candidate queries join documents and chunks, so those two must
    /// share a backend for DEDUP_CHECK to see anything.
    #[must_use]
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: DocumentStore + ChunkStore + JobQueue + 'static,
    {
        self.documents = Some(store.clone());
        self.chunks = Some(store.clone());
        self.queue = Some(store);
        self
    }

    /// Shared sqlite backend at the configured database file.
    #[cfg(feature = "sqlite")]
    pub async fn with_sqlite_store(self) -> Result<Self, StoreError> {
        let path = self.config.resolve_sqlite_db_name();
        let store = Arc::new(crate::stores::SqliteStore::open(&path).await?);
        Ok(self.with_store(store))
    }

    #[must_use]
    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    #[must_use]
    pub fn with_chunks(mut self, chunks: Arc<dyn ChunkStore>) -> Self {
        self.chunks = Some(chunks);
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingClient>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    #[must_use]
    pub fn with_completions(mut self, completions: Arc<dyn CompletionClient>) -> Self {
        self.completions = Some(completions);
        self
    }

    /// One OpenAI-compatible client serving both embeddings and completions.
    #[must_use]
    pub fn with_openai(mut self, client: OpenAiClient) -> Self {
        let client = Arc::new(client);
        self.embeddings = Some(client.clone());
        self.completions = Some(client);
        self
    }

    #[must_use]
    pub fn with_web(mut self, web: Arc<dyn WebIngester>) -> Self {
        self.web = Some(web);
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    #[must_use]
    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Spawns the event-bus listener and the worker pool and hands back the
    /// running pipeline.
    pub async fn build(self) -> Result<PipelineRunner, RunnerError> {
        let (documents, chunks, queue) = match (self.documents, self.chunks, self.queue) {
            (Some(documents), Some(chunks), Some(queue)) => (documents, chunks, queue),
            (None, None, None) => {
                let store = Arc::new(MemoryStore::new());
                (
                    store.clone() as Arc<dyn DocumentStore>,
                    store.clone() as Arc<dyn ChunkStore>,
                    store as Arc<dyn JobQueue>,
                )
            }
            (documents, chunks, _) => {
                let name = if documents.is_none() {
                    "documents"
                } else if chunks.is_none() {
                    "chunks"
                } else {
                    "queue"
                };
                return Err(RunnerError::MissingCollaborator { name });
            }
        };
        let embeddings = self
            .embeddings
            .ok_or(RunnerError::MissingCollaborator { name: "embeddings" })?;
        let completions = self.completions.ok_or(RunnerError::MissingCollaborator {
            name: "completions",
        })?;
        let web: Arc<dyn WebIngester> = match self.web {
            Some(web) => web,
            None => Arc::new(PageIngestor::new()?),
        };

        let config = Arc::new(self.config);
        let budget = Arc::new(match self.pricing {
            Some(pricing) => BudgetGuard::with_pricing(config.budget, pricing),
            None => BudgetGuard::new(config.budget),
        });
        let event_bus = self.event_bus.unwrap_or_default();
        event_bus.listen_for_events();
        let emitter: Arc<dyn EventEmitter> = Arc::new(event_bus.emitter());

        let persistence = Arc::new(PersistenceService::new(
            documents.clone(),
            chunks.clone(),
            queue.clone(),
            embeddings.clone(),
            budget.clone(),
            config.clone(),
            emitter.clone(),
        ));

        let context = ProcessorContext {
            documents,
            chunks,
            queue: queue.clone(),
            embeddings,
            completions,
            web,
            budget,
            persistence: persistence.clone(),
            config: config.clone(),
            emitter,
            job_id: String::new(),
            job_kind: JobKind::Embed,
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let pool = Arc::new(WorkerPool::new(context, config.retry, config.poll_interval));
        let workers = pool.spawn(config.workers, &shutdown_rx);
        info!(workers = config.workers, "pipeline started");

        Ok(PipelineRunner {
            persistence,
            queue,
            config,
            event_bus,
            shutdown,
            workers,
        })
    }
}

/// A running pipeline: worker pool, event bus, and the ingestion surface.
///
/// Dropping the runner aborts the event-bus listener but leaves worker tasks
/// detached; call [`PipelineRunner::shutdown`] for an orderly stop.
pub struct PipelineRunner {
    persistence: Arc<PersistenceService>,
    queue: Arc<dyn JobQueue>,
    config: Arc<RuntimeConfig>,
    event_bus: EventBus,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl PipelineRunner {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// The shared persistence path, for callers that want receipts without
    /// follow-on jobs.
    pub fn persistence(&self) -> Arc<PersistenceService> {
        self.persistence.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Persist `input` and enqueue its follow-on jobs; the workers take it
    /// from there.
    pub async fn ingest(&self, input: PersistInput) -> Result<PersistReceipt, IngestError> {
        let receipt = self.persistence.persist_document(input).await?;
        self.persistence.enqueue_post_persist_jobs(&receipt).await?;
        Ok(receipt)
    }

    /// Queue one job directly, e.g. [`Job::scrape`] or
    /// [`Job::freshness_sweep`].
    pub async fn enqueue(&self, job: Job) -> Result<String, StoreError> {
        self.queue.enqueue(job).await
    }

    pub async fn queue_depth(&self) -> Result<QueueDepth, StoreError> {
        self.queue.depth().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        self.queue.dead_letters().await
    }

    /// Polls until nothing is ready or running. Dead letters do not count
    /// as pending; bound the wait with [`tokio::time::timeout`] if the queue
    /// may keep receiving work.
    pub async fn run_until_idle(&self) -> Result<QueueDepth, StoreError> {
        loop {
            let depth = self.queue.depth().await?;
            if depth.is_idle() {
                return Ok(depth);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Signals the workers, waits for them to finish their current jobs,
    /// then drains the event bus.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.workers.drain(..) {
            if let Err(error) = handle.await {
                warn!(%error, "worker task join failed");
            }
        }
        self.event_bus.stop_listener().await;
        info!("pipeline stopped");
    }
}
