use crate::backfill::{BackfillEngine, BackfillReport};
use crate::dirty::{ReconcileReport, Reconciler};
use crate::drain::{DrainReport, Worker};
use crate::runtime::Runtime;
use searchkit_core::{CancellationToken, PipelineOptions, SearchkitResult};
use searchkit_store::{PruneReport, SearchStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// What one pipeline tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Dirty-marker reconciliation.
    pub reconcile: ReconcileReport,
    /// Lexical document backfill.
    pub documents: BackfillReport,
    /// Vector task backfill.
    pub vectors: BackfillReport,
    /// Queue drain.
    pub drain: DrainReport,
}

/// Reconcile, backfill and drain as one unit of work.
///
/// `run_once` is meant for hosts that already own a job runner; `spawn` runs it
/// on a ticker until cancelled.
pub struct Pipeline {
    store: Arc<dyn SearchStore>,
    runtime: Arc<Runtime>,
    options: PipelineOptions,
    reconciler: Reconciler,
    backfill: Option<BackfillEngine>,
    worker: Worker,
}

impl Pipeline {
    /// Wire the pipeline; fails when the runtime is misconfigured.
    pub fn new(
        store: Arc<dyn SearchStore>,
        runtime: Arc<Runtime>,
        options: PipelineOptions,
    ) -> SearchkitResult<Self> {
        runtime.validate()?;
        let options = options.normalized();

        let mut reconciler = Reconciler::new(store.clone(), &options);
        if let Some(builder) = runtime.lexical_builder() {
            reconciler = reconciler.with_lexical_builder(builder);
        }
        let backfill = runtime.pager().map(|pager| {
            let engine = BackfillEngine::new(store.clone(), pager, options.backfill.clone());
            match runtime.lexical_builder() {
                Some(builder) => engine.with_lexical_builder(builder),
                None => engine,
            }
        });
        let worker = Worker::new(store.clone(), runtime.clone(), options.worker.clone());

        Ok(Self {
            store,
            runtime,
            options,
            reconciler,
            backfill,
            worker,
        })
    }

    /// The drain worker, e.g. to swap its jitter source.
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Replace the worker (keeps the same store and runtime).
    pub fn with_worker(mut self, worker: Worker) -> Self {
        self.worker = worker;
        self
    }

    /// Write the runtime's model set into the registry, pruning stale models.
    pub async fn sync_models(&self) -> SearchkitResult<PruneReport> {
        self.store.upsert_models(&self.runtime.model_specs()).await
    }

    /// Reconcile dirty markers, backfill documents then vectors, then drain.
    pub async fn run_once(&self, cancel: &CancellationToken) -> SearchkitResult<PipelineReport> {
        let span = tracing::info_span!("pipeline", tick_id = %Uuid::new_v4());
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> SearchkitResult<PipelineReport> {
        let mut report = PipelineReport::default();
        if cancel.is_cancelled() {
            return Ok(report);
        }
        report.reconcile = self.reconciler.reconcile_once().await?;

        if let Some(engine) = &self.backfill {
            let languages = &self.options.supported_languages;
            let mut budget = engine.budget();
            report.documents = engine
                .run_documents(&mut budget, &self.options.lexical_entity_types, languages)
                .await?;
            if !cancel.is_cancelled() {
                let models: Vec<String> = self
                    .store
                    .active_models()
                    .await?
                    .into_iter()
                    .map(|m| m.name)
                    .collect();
                report.vectors = engine
                    .run_vectors(
                        &mut budget,
                        &models,
                        &self.options.semantic_entity_types,
                        languages,
                    )
                    .await?;
            }
        }

        report.drain = self.worker.drain_once(cancel).await?;
        Ok(report)
    }

    /// Run [`run_once`](Self::run_once) every `interval` until `cancel` fires.
    ///
    /// Tick errors are logged and the loop keeps going.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.options.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = self.options.interval_ms, "Pipeline started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once(&cancel).await {
                            warn!(error = %e, "Pipeline tick failed");
                        }
                    }
                }
            }
            info!("Pipeline stopped");
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("runtime", &self.runtime)
            .field("options", &self.options)
            .field("backfill", &self.backfill)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryCorpus;
    use searchkit_core::{EntityRef, ModelSpec, Modality};
    use searchkit_embed::LocalEmbedding;
    use searchkit_store::{DirtyStore, DocumentStore, ModelRegistry, SqliteStore, VectorStore};
    use std::time::Duration;

    fn options() -> PipelineOptions {
        PipelineOptions {
            supported_languages: vec!["en".into()],
            lexical_entity_types: vec!["gallery".into()],
            semantic_entity_types: vec!["gallery".into()],
            interval_ms: 10,
            ..PipelineOptions::default()
        }
    }

    fn pipeline(store: Arc<SqliteStore>, corpus: Arc<MemoryCorpus>) -> Pipeline {
        let runtime = Runtime::new(corpus.clone())
            .with_text_model(16, Arc::new(LocalEmbedding::new("local", 16)))
            .with_lexical_builder(corpus.clone())
            .with_pager(corpus);
        Pipeline::new(store, Arc::new(runtime), options()).unwrap()
    }

    #[tokio::test]
    async fn test_run_once_backfills_and_embeds() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let corpus = Arc::new(MemoryCorpus::new());
        corpus.insert("gallery", "1", "en", "red car");
        corpus.insert("gallery", "2", "en", "blue boat");
        let pipeline = pipeline(store.clone(), corpus);

        let pruned = pipeline.sync_models().await.unwrap();
        assert_eq!(pruned.upserted, 1);

        let report = pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.documents.documents, 2);
        assert_eq!(report.vectors.enqueued, 2);
        assert_eq!(report.drain.completed, 2);
        assert_eq!(store.vector_count(Some("local")).await.unwrap(), 2);
        assert_eq!(store.document_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sync_models_prunes_stale() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .upsert_models(&[ModelSpec::new("retired", 4, Modality::Text)])
            .await
            .unwrap();
        let pipeline = pipeline(store.clone(), Arc::new(MemoryCorpus::new()));
        let report = pipeline.sync_models().await.unwrap();
        assert_eq!(report.models_removed, 1);
        let names: Vec<String> = store
            .active_models()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["local"]);
    }

    #[tokio::test]
    async fn test_spawn_processes_dirty_until_cancelled() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let corpus = Arc::new(MemoryCorpus::new());
        let pipeline = Arc::new(pipeline(store.clone(), corpus.clone()));
        pipeline.sync_models().await.unwrap();

        corpus.insert("gallery", "7", "en", "green tree");
        store
            .mark_dirty(&EntityRef::new("gallery", "7", "en"), false, "edit")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = pipeline.clone().spawn(cancel.clone());
        let mut embedded = false;
        for _ in 0..200 {
            if store.vector_count(None).await.unwrap() == 1 {
                embedded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(embedded);
        assert_eq!(store.dirty_count().await.unwrap(), 0);
    }
}
