//! One in-memory pipeline wired for processor tests: a shared
//! [`MemoryStore`] behind all three store seams, scripted providers, an
//! unlimited budget, and a recording emitter.

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;

use gleanforge::budget::{BudgetGuard, BudgetLimits};
use gleanforge::event_bus::{EmitterError, Event, EventEmitter};
use gleanforge::ingest::PersistenceService;
use gleanforge::model::{ChunkRecord, Document};
use gleanforge::processor::ProcessorContext;
use gleanforge::runtimes::RuntimeConfig;
use gleanforge::stores::{ChunkStore, DocumentStore, MemoryStore};
use gleanforge::types::JobKind;

use super::clients::{ScriptedCompletions, ScriptedEmbeddings, StubWeb};

/// Emitter that records everything it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.message().to_string())
            .collect()
    }

    /// True when any recorded message contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| event.message().contains(needle))
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: Event) -> Result<(), EmitterError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Everything a processor test needs, sharing one backend.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub embeddings: Arc<ScriptedEmbeddings>,
    pub completions: Arc<ScriptedCompletions>,
    pub web: Arc<StubWeb>,
    pub budget: Arc<BudgetGuard>,
    pub emitter: RecordingEmitter,
    pub persistence: Arc<PersistenceService>,
    pub ctx: ProcessorContext,
}

pub fn harness() -> Harness {
    harness_with(RuntimeConfig::default(), BudgetLimits::unlimited())
}

pub fn harness_with(config: RuntimeConfig, limits: BudgetLimits) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let embeddings = Arc::new(ScriptedEmbeddings::new());
    let completions = Arc::new(ScriptedCompletions::new());
    let web = Arc::new(StubWeb::new());
    let budget = Arc::new(BudgetGuard::new(limits));
    let emitter = RecordingEmitter::default();
    let config = Arc::new(config);

    let persistence = Arc::new(PersistenceService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        embeddings.clone(),
        budget.clone(),
        config.clone(),
        Arc::new(emitter.clone()),
    ));

    let ctx = ProcessorContext {
        documents: store.clone(),
        chunks: store.clone(),
        queue: store.clone(),
        embeddings: embeddings.clone(),
        completions: completions.clone(),
        web: web.clone(),
        budget: budget.clone(),
        persistence: persistence.clone(),
        config,
        emitter: Arc::new(emitter.clone()),
        job_id: "job-test".to_string(),
        job_kind: JobKind::Embed,
    };

    Harness {
        store,
        embeddings,
        completions,
        web,
        budget,
        emitter,
        persistence,
        ctx,
    }
}

impl Harness {
    /// Context rebound to `kind`, so emitted job events carry the right
    /// label.
    pub fn ctx_for(&self, kind: JobKind) -> ProcessorContext {
        self.ctx.for_job("job-test", kind)
    }

    /// Inserts `document` and returns it.
    pub async fn seed(&self, document: Document) -> Document {
        self.store.insert_document(document.clone()).await.unwrap();
        document
    }

    /// Inserts a document that already completed an embed pass under
    /// `model_id`, with one stored chunk per vector.
    pub async fn seed_embedded(
        &self,
        id: &str,
        content: &str,
        model_id: &str,
        vectors: Vec<Vec<f32>>,
    ) -> Document {
        let mut document = Document::new(format!("Doc {id}"), content).with_id(id);
        document.mark_embedded(model_id, Utc::now());
        self.store.insert_document(document).await.unwrap();
        let rows: Vec<ChunkRecord> = vectors
            .into_iter()
            .enumerate()
            .map(|(index, vector)| {
                ChunkRecord::new(id, index, &format!("{content} #{index}"), vector, model_id)
            })
            .collect();
        self.store.replace_chunks(id, rows).await.unwrap();
        self.store.fetch_document(id).await.unwrap().unwrap()
    }
}

/// A document whose `ingested_at` sits `age_days` in the past.
pub fn aged_document(id: &str, title: &str, content: &str, age_days: i64) -> Document {
    let mut document = Document::new(title, content).with_id(id);
    document.ingested_at = Utc::now() - Duration::days(age_days);
    document
}
