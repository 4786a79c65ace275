use crate::collaborators::LexicalDocumentBuilder;
use searchkit_core::{DirtyMarker, PipelineOptions, SearchkitResult};
use searchkit_store::SearchStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Reason recorded on tasks enqueued from dirty markers.
pub const DIRTY_REASON: &str = "dirty";

/// Counters for one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Markers fetched.
    pub fetched: usize,
    /// Deleted entities purged.
    pub deleted: usize,
    /// Lexical documents written.
    pub documents_upserted: usize,
    /// Lexical documents removed because their text was empty.
    pub documents_removed: usize,
    /// Embedding tasks enqueued.
    pub enqueued: usize,
    /// Markers cleared.
    pub cleared: usize,
}

/// Applies host change markers to documents, vectors and the task queue.
pub struct Reconciler {
    store: Arc<dyn SearchStore>,
    lexical_builder: Option<Arc<dyn LexicalDocumentBuilder>>,
    lexical_types: BTreeSet<String>,
    semantic_types: BTreeSet<String>,
    batch_size: usize,
}

impl Reconciler {
    /// Create a reconciler tracking the entity types in `options`.
    pub fn new(store: Arc<dyn SearchStore>, options: &PipelineOptions) -> Self {
        let options = options.normalized();
        Self {
            store,
            lexical_builder: None,
            lexical_types: options.lexical_entity_types.into_iter().collect(),
            semantic_types: options.semantic_entity_types.into_iter().collect(),
            batch_size: options.dirty_batch_size,
        }
    }

    /// Builder for lexical documents of changed entities.
    pub fn with_lexical_builder(mut self, builder: Arc<dyn LexicalDocumentBuilder>) -> Self {
        self.lexical_builder = Some(builder);
        self
    }

    /// Process one batch of markers.
    pub async fn reconcile_once(&self) -> SearchkitResult<ReconcileReport> {
        let markers = self.store.fetch_dirty(self.batch_size).await?;
        let mut report = ReconcileReport {
            fetched: markers.len(),
            ..ReconcileReport::default()
        };
        if markers.is_empty() {
            return Ok(report);
        }

        let markers: Vec<DirtyMarker> = markers
            .into_iter()
            .filter(|m| !m.entity.is_blank())
            .collect();

        for marker in markers.iter().filter(|m| m.is_deleted) {
            let entity = &marker.entity;
            self.store.delete_document(entity).await?;
            self.store.delete_vectors_for_entity(entity).await?;
            self.store.delete_all_for_entity(entity).await?;
            report.deleted += 1;
        }

        let live: Vec<&DirtyMarker> = markers.iter().filter(|m| !m.is_deleted).collect();
        self.rebuild_documents(&live, &mut report).await?;
        self.fan_out(&live, &mut report).await?;

        report.cleared = self.store.clear_dirty(&markers).await?;
        info!(
            fetched = report.fetched,
            deleted = report.deleted,
            documents_upserted = report.documents_upserted,
            documents_removed = report.documents_removed,
            enqueued = report.enqueued,
            cleared = report.cleared,
            "Dirty markers reconciled"
        );
        Ok(report)
    }

    async fn rebuild_documents(
        &self,
        live: &[&DirtyMarker],
        report: &mut ReconcileReport,
    ) -> SearchkitResult<()> {
        let Some(builder) = &self.lexical_builder else {
            return Ok(());
        };
        let groups = group(live, |t| self.lexical_types.contains(t));
        for ((entity_type, language), ids) in groups {
            let documents = builder.build(&entity_type, &language, &ids).await?;
            let write = self
                .store
                .upsert_documents(&entity_type, &language, &documents)
                .await?;
            debug!(
                entity_type = %entity_type,
                language = %language,
                requested = ids.len(),
                upserted = write.upserted,
                deleted = write.deleted,
                "Lexical documents rebuilt"
            );
            report.documents_upserted += write.upserted;
            report.documents_removed += write.deleted;
        }
        Ok(())
    }

    async fn fan_out(
        &self,
        live: &[&DirtyMarker],
        report: &mut ReconcileReport,
    ) -> SearchkitResult<()> {
        let groups = group(live, |t| self.semantic_types.contains(t));
        if groups.is_empty() {
            return Ok(());
        }
        let models = self.store.active_models().await?;
        for model in &models {
            for ((entity_type, language), ids) in &groups {
                report.enqueued += self
                    .store
                    .enqueue_many(entity_type, ids, &model.name, language, DIRTY_REASON)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Ids grouped by `(entity_type, language)`, sorted, for tracked types.
fn group(
    markers: &[&DirtyMarker],
    tracked: impl Fn(&str) -> bool,
) -> BTreeMap<(String, String), Vec<String>> {
    let mut groups: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
    for marker in markers {
        let e = &marker.entity;
        if tracked(&e.entity_type) {
            groups
                .entry((e.entity_type.clone(), e.language.clone()))
                .or_default()
                .insert(e.entity_id.clone());
        }
    }
    groups
        .into_iter()
        .map(|(k, ids)| (k, ids.into_iter().collect()))
        .collect()
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("lexical_types", &self.lexical_types)
            .field("semantic_types", &self.semantic_types)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryCorpus;
    use searchkit_core::{EntityRef, Modality, ModelSpec, TaskKey};
    use searchkit_store::{
        DirtyStore, DocumentStore, ModelRegistry, SqliteStore, TaskStore, VectorStore,
    };

    fn options() -> PipelineOptions {
        PipelineOptions {
            supported_languages: vec!["en".into()],
            lexical_entity_types: vec!["gallery".into()],
            semantic_entity_types: vec!["gallery".into(), "video".into()],
            ..PipelineOptions::default()
        }
    }

    async fn setup() -> (Arc<SqliteStore>, Arc<MemoryCorpus>, Reconciler) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .upsert_models(&[
                ModelSpec::new("text", 4, Modality::Text),
                ModelSpec::new("vl", 4, Modality::Vl),
            ])
            .await
            .unwrap();
        let corpus = Arc::new(MemoryCorpus::new());
        let reconciler =
            Reconciler::new(store.clone(), &options()).with_lexical_builder(corpus.clone());
        (store, corpus, reconciler)
    }

    #[tokio::test]
    async fn test_changed_entities_rebuild_and_fan_out() {
        let (store, corpus, reconciler) = setup().await;
        corpus.insert("gallery", "1", "en", "Red Car");
        corpus.insert("video", "9", "en", "Clip");
        store
            .mark_dirty(&EntityRef::new("gallery", "1", "en"), false, "edit")
            .await
            .unwrap();
        store
            .mark_dirty(&EntityRef::new("video", "9", "en"), false, "edit")
            .await
            .unwrap();
        store
            .mark_dirty(&EntityRef::new("untracked", "5", "en"), false, "edit")
            .await
            .unwrap();

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.documents_upserted, 1);
        assert_eq!(report.enqueued, 4);
        assert_eq!(report.cleared, 3);

        let doc = store
            .get_document(&EntityRef::new("gallery", "1", "en"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.document, "red car");
        assert!(store
            .get_document(&EntityRef::new("video", "9", "en"))
            .await
            .unwrap()
            .is_none());
        let task = store
            .get_task(&TaskKey::new("video", "9", "vl", "en"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.reason, DIRTY_REASON);
        assert_eq!(store.dirty_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deleted_marker_purges_everything() {
        let (store, corpus, reconciler) = setup().await;
        corpus.insert("gallery", "1", "en", "Red Car");
        let entity = EntityRef::new("gallery", "1", "en");
        store.mark_dirty(&entity, false, "create").await.unwrap();
        reconciler.reconcile_once().await.unwrap();
        store
            .upsert_vector(&entity.with_model("text"), &[1.0, 0.0])
            .await
            .unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 2);

        store.mark_dirty(&entity, true, "delete").await.unwrap();
        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.enqueued, 0);
        assert!(store.get_document(&entity).await.unwrap().is_none());
        assert_eq!(store.vector_count(None).await.unwrap(), 0);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.dirty_count().await.unwrap(), 0);

        let again = reconciler.reconcile_once().await.unwrap();
        assert_eq!(again, ReconcileReport::default());
    }

    #[tokio::test]
    async fn test_missing_builder_result_leaves_document() {
        let (store, corpus, reconciler) = setup().await;
        corpus.insert("gallery", "1", "en", "Red Car");
        let entity = EntityRef::new("gallery", "1", "en");
        store.mark_dirty(&entity, false, "create").await.unwrap();
        reconciler.reconcile_once().await.unwrap();

        // The host no longer returns text, but did not mark a deletion.
        corpus.remove("gallery", "1");
        store.mark_dirty(&entity, false, "edit").await.unwrap();
        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.documents_upserted, 0);
        assert!(store.get_document(&entity).await.unwrap().is_some());
    }
}
