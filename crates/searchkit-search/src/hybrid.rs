use crate::backends::{
    merge_max_score, KeywordBackend, LexicalBackend, NativeScriptBackend, StoreVectorBackend,
    TrigramBackend, VectorBackend, VectorMode,
};
use crate::query::{contains_ascii_alnum, contains_cjk, searchable};
use crate::rrf::{fuse_rrf, RrfKey, RrfOptions};
use searchkit_core::{EntityRef, SearchOptions, SearchkitResult};
use searchkit_embed::{l2_normalize_in_place, TextEmbedder};
use searchkit_store::{LexicalQuery, SearchStore, VectorFilter, VectorQuery};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

/// A hybrid search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text as typed.
    pub query: String,
    /// Language of documents and vectors searched.
    pub language: String,
    /// Entity types searched lexically; empty means all.
    #[serde(default)]
    pub lexical_entity_types: Vec<String>,
    /// Entity types searched semantically; empty means all.
    #[serde(default)]
    pub semantic_entity_types: Vec<String>,
    /// Model whose vectors the semantic leg searches.
    #[serde(default)]
    pub model: String,
    /// Precomputed query vector; embedded on demand when absent.
    #[serde(default)]
    pub query_vector: Option<Vec<f32>>,
    /// Cap for every leg and for the fused result.
    pub limit: usize,
    /// Entity ids dropped from semantic results.
    #[serde(default)]
    pub exclude_ids: BTreeSet<String>,
}

impl SearchRequest {
    /// A request over every entity type with no semantic model.
    pub fn new(query: impl Into<String>, language: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            language: language.into(),
            limit,
            ..Self::default()
        }
    }

    /// Search vectors of `model`.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Use a precomputed query vector.
    pub fn with_query_vector(mut self, vector: Vec<f32>) -> Self {
        self.query_vector = Some(vector);
        self
    }

    /// Restrict the lexical leg.
    pub fn with_lexical_entity_types(mut self, types: Vec<String>) -> Self {
        self.lexical_entity_types = types;
        self
    }

    /// Restrict the semantic leg.
    pub fn with_semantic_entity_types(mut self, types: Vec<String>) -> Self {
        self.semantic_entity_types = types;
        self
    }
}

/// One fused result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Matching entity.
    pub entity: EntityRef,
    /// Fused RRF score.
    pub score: f32,
}

/// Lexical plus semantic retrieval fused with RRF.
///
/// Lexical dispatch depends on the language: CJK-family languages go to the
/// trigram backend for romanised input and to the native-script backend for
/// native input; mixed input runs both and keeps each entity's best score in
/// a single lexical list. Every other language goes to keyword full-text
/// search. The semantic leg always runs.
pub struct HybridSearcher {
    pub(crate) store: Arc<dyn SearchStore>,
    pub(crate) options: SearchOptions,
    keyword: Arc<dyn LexicalBackend>,
    trigram: Arc<dyn LexicalBackend>,
    native: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    embedders: BTreeMap<String, Arc<dyn TextEmbedder>>,
}

impl HybridSearcher {
    /// Searcher over `store`; options are normalised.
    pub fn new(store: Arc<dyn SearchStore>, options: SearchOptions) -> Self {
        let options = options.normalized();
        let mode = VectorMode::from_flags(options.two_stage, options.oversample_factor);
        Self {
            keyword: Arc::new(KeywordBackend::new(store.clone())),
            trigram: Arc::new(TrigramBackend::new(
                store.clone(),
                options.trigram_min_similarity,
            )),
            native: Arc::new(NativeScriptBackend::new(
                store.clone(),
                false,
                options.native_score_k,
            )),
            vector: Arc::new(StoreVectorBackend::new(store.clone(), mode)),
            embedders: BTreeMap::new(),
            store,
            options,
        }
    }

    /// Embed queries for `embedder.model()` when no vector is supplied.
    pub fn with_text_embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedders.insert(embedder.model().to_string(), embedder);
        self
    }

    /// Replace the semantic backend.
    pub fn with_vector_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.vector = backend;
        self
    }

    /// The effective options.
    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Run both legs and fuse them.
    pub async fn search(&self, request: &SearchRequest) -> SearchkitResult<Vec<SearchHit>> {
        let Some(query) = searchable(&request.query) else {
            return Ok(Vec::new());
        };
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let span = info_span!(
            "search",
            language = %request.language,
            model = %request.model,
            limit = request.limit
        );
        async move {
            let (lexical, semantic) = tokio::try_join!(
                self.lexical_list(&query, request),
                self.semantic_list(&query, request)
            )?;
            debug!(
                lexical_hits = lexical.len(),
                semantic_hits = semantic.len(),
                "Fusing ranked lists"
            );
            let lists = [lexical, semantic];

            let options = RrfOptions::new(self.options.rrf_k, request.limit);
            Ok(fuse_rrf(&lists, &options)
                .into_iter()
                .map(|hit| SearchHit {
                    entity: hit.key.entity(),
                    score: hit.score,
                })
                .collect())
        }
        .instrument(span)
        .await
    }

    /// One best-first lexical list; CJK legs are merged by best score.
    async fn lexical_list(
        &self,
        query: &str,
        request: &SearchRequest,
    ) -> SearchkitResult<Vec<RrfKey>> {
        let lexical = LexicalQuery::new(query, request.language.as_str(), request.limit)
            .with_entity_types(request.lexical_entity_types.clone());

        let mut backends: Vec<&Arc<dyn LexicalBackend>> = Vec::new();
        if self.options.is_cjk_language(&request.language) {
            if contains_ascii_alnum(query) {
                backends.push(&self.trigram);
            }
            if contains_cjk(query) {
                backends.push(&self.native);
            }
        } else {
            backends.push(&self.keyword);
        }

        let mut legs = Vec::with_capacity(backends.len());
        for backend in backends {
            let hits = backend.search(&lexical).await?;
            debug!(backend = backend.name(), hits = hits.len(), "Lexical leg");
            legs.push(hits);
        }
        let hits = if legs.len() == 1 {
            legs.remove(0)
        } else {
            merge_max_score(legs)
        };
        Ok(hits.iter().map(|h| RrfKey::from_entity(&h.entity)).collect())
    }

    async fn semantic_list(
        &self,
        query: &str,
        request: &SearchRequest,
    ) -> SearchkitResult<Vec<RrfKey>> {
        let vector = self.query_vector(query, request).await?;
        if vector.is_empty() {
            return Ok(Vec::new());
        }
        let knn = VectorQuery {
            model: request.model.clone(),
            vector,
            limit: request.limit,
            min_similarity: self.options.min_similarity,
            filter: VectorFilter {
                entity_types: request.semantic_entity_types.clone(),
                exclude_ids: request.exclude_ids.clone(),
                language: Some(request.language.clone()),
                ..VectorFilter::default()
            },
        };
        let hits = self.vector.knn(&knn).await?;
        // Empty model so semantic hits coincide with lexical keys.
        Ok(hits.iter().map(|h| RrfKey::from_entity(&h.entity)).collect())
    }

    /// The supplied vector, else the embedded query, else empty.
    async fn query_vector(
        &self,
        query: &str,
        request: &SearchRequest,
    ) -> SearchkitResult<Vec<f32>> {
        if let Some(vector) = &request.query_vector {
            return Ok(vector.clone());
        }
        if request.model.trim().is_empty() {
            return Ok(Vec::new());
        }
        let Some(embedder) = self.embedders.get(request.model.trim()) else {
            return Ok(Vec::new());
        };
        let mut vector = embedder.embed_text(query).await?;
        l2_normalize_in_place(&mut vector);
        Ok(vector)
    }
}

impl std::fmt::Debug for HybridSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSearcher")
            .field("options", &self.options)
            .field("embedders", &self.embedders.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use searchkit_core::TaskKey;
    use searchkit_embed::LocalEmbedding;
    use searchkit_store::{DocumentStore, SqliteStore, VectorStore};

    async fn store() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let docs: BTreeMap<String, String> = [
            ("1".to_string(), "red car".to_string()),
            ("2".to_string(), "blue boat".to_string()),
            ("3".to_string(), "red boat".to_string()),
        ]
        .into_iter()
        .collect();
        store.upsert_documents("gallery", "en", &docs).await.unwrap();
        store
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.entity.entity_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_unsearchable_query_is_empty() {
        let searcher = HybridSearcher::new(store().await, SearchOptions::default());
        for q in ["", "   ", "?!", "--"] {
            let hits = searcher.search(&SearchRequest::new(q, "en", 10)).await.unwrap();
            assert!(hits.is_empty());
        }
        let hits = searcher.search(&SearchRequest::new("red", "en", 0)).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_lexical_only_without_vector() {
        let searcher = HybridSearcher::new(store().await, SearchOptions::default());
        let hits = searcher
            .search(&SearchRequest::new("  red   car ", "en", 10))
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec!["1"]);
    }

    #[tokio::test]
    async fn test_semantic_leg_fuses_with_lexical() {
        let store = store().await;
        for (id, v) in [("1", [1.0, 0.0]), ("2", [0.0, 1.0]), ("3", [0.6, 0.8])] {
            store
                .upsert_vector(&TaskKey::new("gallery", id, "m", "en"), &v)
                .await
                .unwrap();
        }
        let searcher = HybridSearcher::new(store, SearchOptions::default());
        let request = SearchRequest::new("boat", "en", 10)
            .with_model("m")
            .with_query_vector(vec![0.0, 1.0]);
        let hits = searcher.search(&request).await.unwrap();
        // "2" is in both lists, "3" lexical and second semantically.
        assert_eq!(hits[0].entity.entity_id, "2");
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.entity.language == "en"));
    }

    #[tokio::test]
    async fn test_query_embedded_when_vector_missing() {
        let store = store().await;
        let embedder = Arc::new(LocalEmbedding::new("local", 32));
        for (id, text) in [("1", "red car"), ("2", "blue boat")] {
            let v = embedder.embed_text(text).await.unwrap();
            store
                .upsert_vector(&TaskKey::new("gallery", id, "local", "en"), &v)
                .await
                .unwrap();
        }
        let searcher =
            HybridSearcher::new(store, SearchOptions::default()).with_text_embedder(embedder);
        let hits = searcher
            .search(&SearchRequest::new("blue boat", "en", 10).with_model("local"))
            .await
            .unwrap();
        // "1" only reaches the result through the embedded query.
        assert_eq!(hits[0].entity.entity_id, "2");
        assert!(ids(&hits).contains(&"1"));
    }

    #[tokio::test]
    async fn test_mixed_script_entity_counts_once() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ja: BTreeMap<String, String> = [("1".to_string(), "tokyo 東京 tower".to_string())]
            .into_iter()
            .collect();
        store.upsert_documents("gallery", "ja", &ja).await.unwrap();
        let searcher = HybridSearcher::new(store, SearchOptions::default());
        let request = SearchRequest::new("tokyo 東京", "ja", 10);

        let lexical = searcher.lexical_list("tokyo 東京", &request).await.unwrap();
        assert_eq!(lexical.len(), 1);
        assert_eq!(lexical[0].entity_id, "1");

        let hits = searcher.search(&request).await.unwrap();
        assert_eq!(ids(&hits), vec!["1"]);
        assert!((hits[0].score - 1.0 / 61.0).abs() < 1e-6);
    }
}
