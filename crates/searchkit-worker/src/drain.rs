use crate::backoff::{classify, Decision, JitterSource, OsJitter, RetryPolicy};
use crate::gate::DispatchGate;
use crate::runtime::Runtime;
use futures_util::future::join_all;
use searchkit_core::{
    CancellationToken, SearchkitError, SearchkitResult, Task, TaskKey, WorkerOptions,
};
use searchkit_embed::{l2_normalize_in_place, AssetUrl};
use searchkit_store::SearchStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Counters for one drain tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Tasks leased by the tick.
    pub fetched: usize,
    /// Tasks embedded and deleted.
    pub completed: usize,
    /// Tasks deleted because the entity or its assets are gone.
    pub not_found: usize,
    /// Tasks rescheduled with backoff.
    pub retried: usize,
    /// Tasks moved to the dead-letter table.
    pub dead_lettered: usize,
    /// Settle calls that lost the lease to another worker.
    pub lost_lease: usize,
}

impl DrainReport {
    fn absorb(&mut self, other: &DrainReport) {
        self.completed += other.completed;
        self.not_found += other.not_found;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.lost_lease += other.lost_lease;
    }
}

/// Documents and assets loaded for one batch.
#[derive(Debug, Default)]
struct Hydrated {
    documents: BTreeMap<(String, String), BTreeMap<String, String>>,
    assets: BTreeMap<String, BTreeMap<String, Vec<AssetUrl>>>,
}

impl Hydrated {
    fn document(&self, key: &TaskKey) -> Option<&str> {
        self.documents
            .get(&(key.entity_type.clone(), key.language.clone()))?
            .get(&key.entity_id)
            .map(String::as_str)
            .filter(|doc| !doc.trim().is_empty())
    }

    fn assets(&self, key: &TaskKey) -> &[AssetUrl] {
        self.assets
            .get(&key.entity_type)
            .and_then(|m| m.get(&key.entity_id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// A unit of provider work guarded by one gate permit.
enum Unit {
    Text {
        model: String,
        items: Vec<(Task, String)>,
    },
    Vl {
        task: Task,
        document: String,
        assets: Vec<AssetUrl>,
    },
}

#[derive(Default)]
struct UnitOutcome {
    report: DrainReport,
    store_error: Option<SearchkitError>,
}

fn is_blank(key: &TaskKey) -> bool {
    key.validate().is_err()
}

/// Copy an error for fan-out to several items, keeping its kind.
fn replicate(err: &SearchkitError) -> SearchkitError {
    match err {
        SearchkitError::NotFound(msg) => SearchkitError::NotFound(msg.clone()),
        SearchkitError::Provider { kind, message } => SearchkitError::Provider {
            kind: *kind,
            message: message.clone(),
        },
        other => SearchkitError::Provider {
            kind: other.kind(),
            message: other.to_string(),
        },
    }
}

/// Drains the embedding task queue.
///
/// Each tick leases a batch, hydrates documents and assets, embeds through a
/// shared [`DispatchGate`], stores normalised vectors and settles every task
/// with its lease token.
pub struct Worker {
    store: Arc<dyn SearchStore>,
    runtime: Arc<Runtime>,
    options: WorkerOptions,
    policy: RetryPolicy,
    gate: DispatchGate,
    jitter: Arc<dyn JitterSource>,
}

impl Worker {
    /// Create a worker; options are normalised.
    pub fn new(
        store: Arc<dyn SearchStore>,
        runtime: Arc<Runtime>,
        options: WorkerOptions,
    ) -> Self {
        let options = options.normalized();
        let gate = DispatchGate::new(
            options.max_concurrent_embeds,
            options.max_requests_per_second,
        );
        Self {
            policy: RetryPolicy::from_options(&options),
            store,
            runtime,
            options,
            gate,
            jitter: Arc::new(OsJitter),
        }
    }

    /// Replace the jitter source.
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// The effective options.
    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Poll until `cancel` fires, draining one batch per tick.
    ///
    /// Returns `Ok(())` on cancellation and the first tick error otherwise.
    pub async fn run(&self, cancel: &CancellationToken) -> SearchkitResult<()> {
        let mut ticker = tokio::time::interval(self.options.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_ms = self.options.poll_interval_ms,
            batch_size = self.options.batch_size,
            "Embedding worker started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Embedding worker stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_once(cancel).await {
                        warn!(error = %e, "Embedding worker tick failed");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Lease, embed and settle one batch.
    pub async fn drain_once(&self, cancel: &CancellationToken) -> SearchkitResult<DrainReport> {
        let span = tracing::info_span!("drain", tick_id = %Uuid::new_v4());
        self.drain_inner(cancel).instrument(span).await
    }

    async fn drain_inner(&self, cancel: &CancellationToken) -> SearchkitResult<DrainReport> {
        let mut report = DrainReport::default();
        if cancel.is_cancelled() {
            return Ok(report);
        }

        let tasks = self
            .store
            .fetch_ready(self.options.batch_size, self.options.lease())
            .await?;
        report.fetched = tasks.len();
        if tasks.is_empty() {
            return Ok(report);
        }

        let hydrated = self.hydrate(&tasks).await?;

        let mut outcome = UnitOutcome::default();
        let mut text_by_model: BTreeMap<String, Vec<(Task, String)>> = BTreeMap::new();
        let mut units = Vec::new();
        for task in tasks {
            let document = match hydrated.document(&task.key) {
                Some(doc) if !is_blank(&task.key) => doc.to_string(),
                _ => {
                    let err = SearchkitError::not_found(format!("no document for {}", task.key));
                    self.settle(&task, Err(err), &mut outcome).await;
                    continue;
                }
            };
            if self.runtime.is_vl_model(&task.key.model) {
                let assets = hydrated.assets(&task.key).to_vec();
                if assets.is_empty() {
                    let err = SearchkitError::not_found(format!("no assets for {}", task.key));
                    self.settle(&task, Err(err), &mut outcome).await;
                    continue;
                }
                units.push(Unit::Vl {
                    task,
                    document,
                    assets,
                });
            } else {
                text_by_model
                    .entry(task.key.model.clone())
                    .or_default()
                    .push((task, document));
            }
        }

        let chunk = self.options.provider_batch_size.max(1);
        let mut text_units = Vec::new();
        for (model, items) in text_by_model {
            let mut items = items.into_iter().peekable();
            while items.peek().is_some() {
                text_units.push(Unit::Text {
                    model: model.clone(),
                    items: items.by_ref().take(chunk).collect(),
                });
            }
        }
        text_units.extend(units);

        let results = join_all(
            text_units
                .into_iter()
                .map(|unit| self.run_unit(unit, cancel)),
        )
        .await;
        for result in results {
            outcome.report.absorb(&result.report);
            if outcome.store_error.is_none() {
                outcome.store_error = result.store_error;
            }
        }

        report.absorb(&outcome.report);
        info!(
            fetched = report.fetched,
            completed = report.completed,
            not_found = report.not_found,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            lost_lease = report.lost_lease,
            "Drain tick finished"
        );
        match outcome.store_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Load documents per `(entity_type, language)` and assets per entity type.
    async fn hydrate(&self, tasks: &[Task]) -> SearchkitResult<Hydrated> {
        let mut ids_by_group: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
        let mut asset_ids: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for task in tasks.iter().filter(|t| !is_blank(&t.key)) {
            let key = &task.key;
            ids_by_group
                .entry((key.entity_type.clone(), key.language.clone()))
                .or_default()
                .insert(key.entity_id.clone());
            if self.runtime.is_vl_model(&key.model) {
                asset_ids
                    .entry(key.entity_type.clone())
                    .or_default()
                    .insert(key.entity_id.clone());
            }
        }

        let mut hydrated = Hydrated::default();
        for ((entity_type, language), ids) in ids_by_group {
            let ids: Vec<String> = ids.into_iter().collect();
            let docs = self
                .runtime
                .build_semantic(&entity_type, &language, &ids)
                .await?;
            hydrated.documents.insert((entity_type, language), docs);
        }
        for (entity_type, ids) in asset_ids {
            let ids: Vec<String> = ids.into_iter().collect();
            let assets = self.runtime.list_assets(&entity_type, &ids).await?;
            hydrated.assets.insert(entity_type, assets);
        }
        Ok(hydrated)
    }

    async fn run_unit(&self, unit: Unit, cancel: &CancellationToken) -> UnitOutcome {
        let mut outcome = UnitOutcome::default();
        let Some(_permit) = self.gate.acquire(cancel).await else {
            debug!("Dispatch cancelled; tasks stay leased");
            return outcome;
        };
        match unit {
            Unit::Text { model, items } => {
                debug!(model = %model, items = items.len(), "Dispatching text batch");
                let results = self.embed_text_batch(&model, &items).await;
                for ((task, _), result) in items.iter().zip(results) {
                    self.settle(task, result, &mut outcome).await;
                }
            }
            Unit::Vl {
                task,
                document,
                assets,
            } => {
                debug!(task = %task.key, assets = assets.len(), "Dispatching VL task");
                let result = self.embed_vl(&task, &document, &assets).await;
                self.settle(&task, result, &mut outcome).await;
            }
        }
        outcome
    }

    /// One result per item, in order.
    async fn embed_text_batch(
        &self,
        model: &str,
        items: &[(Task, String)],
    ) -> Vec<SearchkitResult<()>> {
        let Some(embedder) = self.runtime.text_embedder(model) else {
            return items
                .iter()
                .map(|_| {
                    Err(SearchkitError::permanent(format!(
                        "no text embedder configured for model '{model}'"
                    )))
                })
                .collect();
        };

        let texts: Vec<String> = items.iter().map(|(_, doc)| doc.clone()).collect();
        let vectors = match embedder.embed_texts(&texts).await {
            Ok(v) if v.len() == items.len() => v,
            Ok(v) => {
                let err = SearchkitError::transient(format!(
                    "embedder returned {} vectors for {} inputs",
                    v.len(),
                    items.len()
                ));
                return items.iter().map(|_| Err(replicate(&err))).collect();
            }
            Err(e) => return items.iter().map(|_| Err(replicate(&e))).collect(),
        };

        let mut results = Vec::with_capacity(items.len());
        for ((task, _), mut vector) in items.iter().zip(vectors) {
            l2_normalize_in_place(&mut vector);
            results.push(self.store_vector(&task.key, &vector).await);
        }
        results
    }

    async fn embed_vl(
        &self,
        task: &Task,
        document: &str,
        assets: &[AssetUrl],
    ) -> SearchkitResult<()> {
        let Some(embedder) = self.runtime.vl_embedder(&task.key.model) else {
            return Err(SearchkitError::permanent(format!(
                "no VL embedder configured for model '{}'",
                task.key.model
            )));
        };
        let mut vector = embedder.embed_text_and_asset_urls(document, assets).await?;
        l2_normalize_in_place(&mut vector);
        self.store_vector(&task.key, &vector).await
    }

    async fn store_vector(&self, key: &TaskKey, vector: &[f32]) -> SearchkitResult<()> {
        self.store
            .upsert_vector(key, vector)
            .await
            .map_err(|e| SearchkitError::transient(format!("storing vector failed: {e}")))
    }

    /// Apply the classified decision to the store, recording counters.
    async fn settle(&self, task: &Task, result: SearchkitResult<()>, outcome: &mut UnitOutcome) {
        let kind = result.as_ref().err().map(SearchkitError::kind);
        let decision = classify(kind, task.attempts, &self.policy, self.jitter.as_ref());
        let token = task.lease_token();

        let settled = match decision {
            Decision::Complete => self.store.complete(&task.key, token).await,
            Decision::Retry(backoff) => {
                if let Err(e) = &result {
                    warn!(
                        task = %task.key,
                        attempts = task.attempts + 1,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Embedding failed, retrying"
                    );
                }
                self.store.fail(&task.key, token, backoff).await
            }
            Decision::DeadLetter => {
                let error = result
                    .as_ref()
                    .err()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                warn!(
                    task = %task.key,
                    attempts = task.attempts + 1,
                    error = %error,
                    "Embedding failed permanently, dead-lettering"
                );
                let mut failed = task.clone();
                failed.attempts = task.attempts.saturating_add(1);
                self.store.dead_letter(&failed, token, &error).await
            }
        };

        match settled {
            Ok(true) => match decision {
                Decision::Complete if kind.is_some() => outcome.report.not_found += 1,
                Decision::Complete => outcome.report.completed += 1,
                Decision::Retry(_) => outcome.report.retried += 1,
                Decision::DeadLetter => outcome.report.dead_lettered += 1,
            },
            Ok(false) => {
                warn!(task = %task.key, "Lease lost before settling task");
                outcome.report.lost_lease += 1;
            }
            Err(e) => {
                warn!(task = %task.key, error = %e, "Failed to settle task");
                if outcome.store_error.is_none() {
                    outcome.store_error = Some(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("options", &self.options)
            .field("policy", &self.policy)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backoff::NoJitter;
    use crate::collaborators::MemoryCorpus;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use searchkit_core::{Clock, ErrorKind, ManualClock};
    use searchkit_embed::{LocalEmbedding, TextEmbedder};
    use searchkit_store::{SqliteStore, TaskStore, VectorStore};
    use std::time::Duration;

    /// Fails with a fixed kind, or returns a wrong number of vectors.
    #[derive(Debug)]
    struct ScriptedEmbedder {
        model: String,
        failure: Option<ErrorKind>,
        short: bool,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedEmbedder {
        fn new(model: &str, failure: Option<ErrorKind>, short: bool) -> Self {
            Self {
                model: model.to_string(),
                failure,
                short,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextEmbedder for ScriptedEmbedder {
        fn model(&self) -> &str {
            &self.model
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed_texts(&self, texts: &[String]) -> SearchkitResult<Vec<Vec<f32>>> {
            self.calls.lock().push(texts.len());
            match self.failure {
                Some(ErrorKind::Permanent) => Err(SearchkitError::permanent("rejected")),
                Some(ErrorKind::Transient) => Err(SearchkitError::transient("busy")),
                Some(ErrorKind::NotFound) => Err(SearchkitError::not_found("gone")),
                None if self.short => Ok(vec![vec![1.0, 0.0]]),
                None => Ok(texts.iter().map(|_| vec![3.0, 4.0]).collect()),
            }
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        corpus: Arc<MemoryCorpus>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(
            SqliteStore::open_in_memory()
                .unwrap()
                .with_clock(clock.clone()),
        );
        let corpus = Arc::new(MemoryCorpus::new());
        Fixture {
            store,
            corpus,
            clock,
        }
    }

    fn worker(fx: &Fixture, runtime: Runtime, options: WorkerOptions) -> Worker {
        Worker::new(fx.store.clone(), Arc::new(runtime), options).with_jitter(Arc::new(NoJitter))
    }

    fn key(id: &str, model: &str) -> TaskKey {
        TaskKey::new("gallery", id, model, "en")
    }

    #[tokio::test]
    async fn test_embeds_normalises_and_completes() {
        let fx = fixture();
        fx.corpus.insert("gallery", "1", "en", "red car");
        let embedder = Arc::new(ScriptedEmbedder::new("m", None, false));
        let runtime = Runtime::new(fx.corpus.clone()).with_text_model(2, embedder.clone());
        let w = worker(&fx, runtime, WorkerOptions::default());

        fx.store.enqueue(&key("1", "m"), "dirty").await.unwrap();
        let report = w.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(fx.store.pending_count().await.unwrap(), 0);

        let stored = fx.store.get_vector(&key("1", "m")).await.unwrap().unwrap();
        assert!((stored[0] - 0.6).abs() < 1e-6);
        assert!((stored[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_document_completes_as_not_found() {
        let fx = fixture();
        let runtime = Runtime::new(fx.corpus.clone())
            .with_text_model(8, Arc::new(LocalEmbedding::new("m", 8)));
        let w = worker(&fx, runtime, WorkerOptions::default());

        fx.store.enqueue(&key("gone", "m"), "dirty").await.unwrap();
        let report = w.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.not_found, 1);
        assert_eq!(fx.store.pending_count().await.unwrap(), 0);
        assert_eq!(fx.store.vector_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_text_batches_are_chunked() {
        let fx = fixture();
        let embedder = Arc::new(ScriptedEmbedder::new("m", None, false));
        let runtime = Runtime::new(fx.corpus.clone()).with_text_model(2, embedder.clone());
        let options = WorkerOptions {
            provider_batch_size: 2,
            ..WorkerOptions::default()
        };
        let w = worker(&fx, runtime, options);
        for id in ["1", "2", "3", "4", "5"] {
            fx.corpus.insert("gallery", id, "en", "text");
            fx.store.enqueue(&key(id, "m"), "dirty").await.unwrap();
        }

        let report = w.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.completed, 5);
        let mut calls = embedder.calls.lock().clone();
        calls.sort_unstable();
        assert_eq!(calls, vec![1, 2, 2]);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_with_backoff() {
        let fx = fixture();
        fx.corpus.insert("gallery", "1", "en", "text");
        let runtime = Runtime::new(fx.corpus.clone()).with_text_model(
            2,
            Arc::new(ScriptedEmbedder::new("m", Some(ErrorKind::Transient), false)),
        );
        let w = worker(&fx, runtime, WorkerOptions::default());
        fx.store.enqueue(&key("1", "m"), "dirty").await.unwrap();

        let report = w.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.retried, 1);
        let task = fx.store.get_task(&key("1", "m")).await.unwrap().unwrap();
        assert_eq!(task.attempts, 1);
        assert_eq!(
            task.next_run_at.timestamp_millis() - fx.clock.now().timestamp_millis(),
            5_000
        );
    }

    #[tokio::test]
    async fn test_count_mismatch_is_retried() {
        let fx = fixture();
        fx.corpus.insert("gallery", "1", "en", "a");
        fx.corpus.insert("gallery", "2", "en", "b");
        let runtime = Runtime::new(fx.corpus.clone())
            .with_text_model(2, Arc::new(ScriptedEmbedder::new("m", None, true)));
        let w = worker(&fx, runtime, WorkerOptions::default());
        fx.store.enqueue(&key("1", "m"), "dirty").await.unwrap();
        fx.store.enqueue(&key("2", "m"), "dirty").await.unwrap();

        let report = w.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.retried, 2);
        assert_eq!(fx.store.vector_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters() {
        let fx = fixture();
        fx.corpus.insert("gallery", "1", "en", "text");
        let runtime = Runtime::new(fx.corpus.clone()).with_text_model(
            2,
            Arc::new(ScriptedEmbedder::new("m", Some(ErrorKind::Permanent), false)),
        );
        let w = worker(&fx, runtime, WorkerOptions::default());
        fx.store.enqueue(&key("1", "m"), "dirty").await.unwrap();

        let report = w.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        let dead = fx.store.list_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);
        assert!(dead[0].error.contains("rejected"));
    }

    #[tokio::test]
    async fn test_unconfigured_model_dead_letters() {
        let fx = fixture();
        fx.corpus.insert("gallery", "1", "en", "text");
        let w = worker(&fx, Runtime::new(fx.corpus.clone()), WorkerOptions::default());
        fx.store.enqueue(&key("1", "orphan"), "dirty").await.unwrap();

        let report = w.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(fx.store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_dead_letter() {
        let fx = fixture();
        fx.corpus.insert("gallery", "1", "en", "text");
        let runtime = Runtime::new(fx.corpus.clone()).with_text_model(
            2,
            Arc::new(ScriptedEmbedder::new("m", Some(ErrorKind::Transient), false)),
        );
        let options = WorkerOptions {
            max_attempts: 2,
            ..WorkerOptions::default()
        };
        let w = worker(&fx, runtime, options);
        fx.store.enqueue(&key("1", "m"), "dirty").await.unwrap();

        let cancel = CancellationToken::new();
        assert_eq!(w.drain_once(&cancel).await.unwrap().retried, 1);
        fx.clock.advance(Duration::from_secs(60));
        assert_eq!(w.drain_once(&cancel).await.unwrap().dead_lettered, 1);
        let dead = fx.store.list_dead_letters(10).await.unwrap();
        assert_eq!(dead[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_vl_without_assets_completes() {
        let fx = fixture();
        fx.corpus.insert("gallery", "1", "en", "sunset");
        fx.corpus.insert("gallery", "2", "en", "beach");
        fx.corpus.set_assets(
            "gallery",
            "2",
            vec![AssetUrl::new(
                searchkit_embed::AssetKind::Image,
                "https://cdn/2.jpg",
            )],
        );
        let runtime = Runtime::new(fx.corpus.clone())
            .with_vl_model(8, Arc::new(LocalEmbedding::new("vl", 8)))
            .with_asset_lister(fx.corpus.clone());
        let w = worker(&fx, runtime, WorkerOptions::default());
        fx.store.enqueue(&key("1", "vl"), "dirty").await.unwrap();
        fx.store.enqueue(&key("2", "vl"), "dirty").await.unwrap();

        let report = w.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.not_found, 1);
        assert_eq!(report.completed, 1);
        assert!(fx.store.get_vector(&key("2", "vl")).await.unwrap().is_some());
        assert!(fx.store.get_vector(&key("1", "vl")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_tick_leaves_tasks_leased() {
        let fx = fixture();
        fx.corpus.insert("gallery", "1", "en", "text");
        let runtime = Runtime::new(fx.corpus.clone())
            .with_text_model(8, Arc::new(LocalEmbedding::new("m", 8)));
        let w = worker(&fx, runtime, WorkerOptions::default());
        fx.store.enqueue(&key("1", "m"), "dirty").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = w.drain_once(&cancel).await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(fx.store.pending_count().await.unwrap(), 1);
    }

    #[test]
    fn test_replicate_keeps_kind() {
        let copy = replicate(&SearchkitError::permanent("bad"));
        assert_eq!(copy.kind(), ErrorKind::Permanent);
        let copy = replicate(&SearchkitError::not_found("gone"));
        assert_eq!(copy.kind(), ErrorKind::NotFound);
        let copy = replicate(&SearchkitError::Store("db".into()));
        assert_eq!(copy.kind(), ErrorKind::Transient);
    }
}
