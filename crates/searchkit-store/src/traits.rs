use crate::records::{
    DocumentMatch, DocumentWrite, LexicalQuery, PruneReport, SearchDocument, VectorCandidate,
    VectorMatch, VectorQuery,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use searchkit_core::{
    BackfillState, DeadLetterRecord, DirtyMarker, EntityRef, ModelSpec, SearchkitResult, Task,
    TaskKey,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// The leased embedding task queue.
///
/// Every settling operation is fenced on the lease token returned by
/// [`fetch_ready`](Self::fetch_ready): when the stored `next_run_at` no longer
/// equals the token the call is a no-op returning `Ok(false)`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert the task, or refresh its reason and pull `next_run_at` to
    /// `min(current, now)`. Blank identity fields are a validation error.
    async fn enqueue(&self, key: &TaskKey, reason: &str) -> SearchkitResult<()>;

    /// [`enqueue`](Self::enqueue) for every non-blank id in one transaction.
    async fn enqueue_many(
        &self,
        entity_type: &str,
        ids: &[String],
        model: &str,
        language: &str,
        reason: &str,
    ) -> SearchkitResult<usize>;

    /// Claim up to `limit` due tasks, pushing each `next_run_at` to `now + lease`.
    async fn fetch_ready(&self, limit: usize, lease: Duration) -> SearchkitResult<Vec<Task>>;

    /// Delete the task if the lease still holds.
    async fn complete(&self, key: &TaskKey, token: DateTime<Utc>) -> SearchkitResult<bool>;

    /// Count a failed attempt and reschedule after `backoff` (at least one second).
    async fn fail(
        &self,
        key: &TaskKey,
        token: DateTime<Utc>,
        backoff: Duration,
    ) -> SearchkitResult<bool>;

    /// Move the task into the dead-letter table, recording `task.attempts`.
    async fn dead_letter(
        &self,
        task: &Task,
        token: DateTime<Utc>,
        error: &str,
    ) -> SearchkitResult<bool>;

    /// Drop the entity's tasks across all models.
    async fn delete_all_for_entity(&self, entity: &EntityRef) -> SearchkitResult<usize>;

    /// Look up one task.
    async fn get_task(&self, key: &TaskKey) -> SearchkitResult<Option<Task>>;

    /// Number of live tasks.
    async fn pending_count(&self) -> SearchkitResult<usize>;

    /// Most recent dead letters first.
    async fn list_dead_letters(&self, limit: usize) -> SearchkitResult<Vec<DeadLetterRecord>>;

    /// Move a dead letter back into the queue with `attempts = 0` and reason `"replay"`.
    async fn requeue_dead_letter(&self, key: &TaskKey) -> SearchkitResult<bool>;
}

/// Embedding persistence and nearest-neighbour queries.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store an already normalised embedding for the identity.
    async fn upsert_vector(&self, key: &TaskKey, vector: &[f32]) -> SearchkitResult<()>;

    /// Fetch a stored embedding.
    async fn get_vector(&self, key: &TaskKey) -> SearchkitResult<Option<Vec<f32>>>;

    /// Delete the entity's vectors for every model.
    async fn delete_vectors_for_entity(&self, entity: &EntityRef) -> SearchkitResult<usize>;

    /// The subset of `ids` that already has a vector for the partition.
    async fn existing_vector_ids(
        &self,
        model: &str,
        entity_type: &str,
        language: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeSet<String>>;

    /// Exact cosine ranking. The similarity floor applies only when positive.
    async fn knn(&self, query: &VectorQuery) -> SearchkitResult<Vec<VectorMatch>>;

    /// The `n` vectors closest to the query by Hamming distance over binary
    /// quantisations, with their full vectors for rescoring.
    async fn hamming_candidates(
        &self,
        query: &VectorQuery,
        n: usize,
    ) -> SearchkitResult<Vec<VectorCandidate>>;

    /// Number of stored vectors, optionally for one model.
    async fn vector_count(&self, model: Option<&str>) -> SearchkitResult<usize>;
}

/// Lexical documents and the three lexical search modes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write documents keyed by entity id. Text that normalises to empty
    /// deletes the row.
    async fn upsert_documents(
        &self,
        entity_type: &str,
        language: &str,
        documents: &BTreeMap<String, String>,
    ) -> SearchkitResult<DocumentWrite>;

    /// Delete one document.
    async fn delete_document(&self, entity: &EntityRef) -> SearchkitResult<bool>;

    /// Fetch one document.
    async fn get_document(&self, entity: &EntityRef) -> SearchkitResult<Option<SearchDocument>>;

    /// Full-text search over the normalised column, best-first by bm25.
    async fn keyword_search(&self, query: &LexicalQuery) -> SearchkitResult<Vec<DocumentMatch>>;

    /// Trigram similarity over the normalised column.
    async fn trigram_search(
        &self,
        query: &LexicalQuery,
        min_similarity: f32,
    ) -> SearchkitResult<Vec<DocumentMatch>>;

    /// Token occurrence search over the raw column, scored `raw / (raw + k)`.
    async fn native_search(
        &self,
        query: &LexicalQuery,
        prefix: bool,
        score_k: f32,
    ) -> SearchkitResult<Vec<DocumentMatch>>;

    /// Number of stored documents.
    async fn document_count(&self) -> SearchkitResult<usize>;
}

/// Resumable cursors for vector (`model = Some`) and document (`model = None`)
/// backfill.
#[async_trait]
pub trait BackfillStore: Send + Sync {
    /// Insert the partition in state `running` if absent and return it.
    async fn ensure_backfill_state(
        &self,
        model: Option<&str>,
        entity_type: &str,
        language: &str,
    ) -> SearchkitResult<BackfillState>;

    /// Persist the next cursor after a successful page and clear `last_error`.
    async fn advance_backfill(
        &self,
        model: Option<&str>,
        entity_type: &str,
        language: &str,
        cursor: &str,
        done: bool,
    ) -> SearchkitResult<()>;

    /// Mark the partition failed with the pager error.
    async fn fail_backfill(
        &self,
        model: Option<&str>,
        entity_type: &str,
        language: &str,
        error: &str,
    ) -> SearchkitResult<()>;

    /// Rewind the partition to an empty cursor in state `running`.
    async fn reset_backfill_state(
        &self,
        model: Option<&str>,
        entity_type: &str,
        language: &str,
    ) -> SearchkitResult<bool>;

    /// Every partition, vector partitions first.
    async fn list_backfill_states(&self) -> SearchkitResult<Vec<BackfillState>>;
}

/// Change notifications written by the host.
#[async_trait]
pub trait DirtyStore: Send + Sync {
    /// Record that the entity changed (or was deleted).
    async fn mark_dirty(
        &self,
        entity: &EntityRef,
        is_deleted: bool,
        reason: &str,
    ) -> SearchkitResult<()>;

    /// Oldest markers first.
    async fn fetch_dirty(&self, limit: usize) -> SearchkitResult<Vec<DirtyMarker>>;

    /// Delete markers whose `updated_at` still matches; returns rows removed.
    async fn clear_dirty(&self, markers: &[DirtyMarker]) -> SearchkitResult<usize>;

    /// Number of pending markers.
    async fn dirty_count(&self) -> SearchkitResult<usize>;
}

/// The set of active embedding models.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Validate and write `specs`, then prune state of every other model.
    async fn upsert_models(&self, specs: &[ModelSpec]) -> SearchkitResult<PruneReport>;

    /// Registered models sorted by name.
    async fn active_models(&self) -> SearchkitResult<Vec<ModelSpec>>;
}

/// Everything the pipeline and the searcher need from one backend.
pub trait SearchStore:
    TaskStore + VectorStore + DocumentStore + BackfillStore + DirtyStore + ModelRegistry
{
}

impl<T> SearchStore for T where
    T: TaskStore + VectorStore + DocumentStore + BackfillStore + DirtyStore + ModelRegistry
{
}
