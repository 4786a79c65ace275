use async_trait::async_trait;
use searchkit_core::{EntityRef, SearchkitResult};
use searchkit_store::knn::rescore;
use searchkit_store::{DocumentMatch, LexicalQuery, SearchStore, VectorMatch, VectorQuery};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A lexical hit; higher scores rank first.
pub type LexicalHit = DocumentMatch;

/// A semantic hit; higher similarity ranks first.
pub type VectorHit = VectorMatch;

/// Stage-1 fan-out used when the configured factor is 1 or less.
pub const DEFAULT_OVERSAMPLE_FACTOR: usize = 5;

/// A ranked lexical retriever.
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Best-first hits for `query`.
    async fn search(&self, query: &LexicalQuery) -> SearchkitResult<Vec<LexicalHit>>;
}

/// A ranked nearest-neighbour retriever.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Best-first hits for `query`.
    async fn knn(&self, query: &VectorQuery) -> SearchkitResult<Vec<VectorHit>>;
}

/// Full-text keyword search (FTS5, bm25 order).
pub struct KeywordBackend {
    store: Arc<dyn SearchStore>,
}

impl KeywordBackend {
    /// Keyword search over `store`.
    pub fn new(store: Arc<dyn SearchStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LexicalBackend for KeywordBackend {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn search(&self, query: &LexicalQuery) -> SearchkitResult<Vec<LexicalHit>> {
        self.store.keyword_search(query).await
    }
}

/// Trigram similarity over normalised documents, for romanised input.
pub struct TrigramBackend {
    store: Arc<dyn SearchStore>,
    min_similarity: f32,
}

impl TrigramBackend {
    /// Trigram search dropping hits below `min_similarity`.
    pub fn new(store: Arc<dyn SearchStore>, min_similarity: f32) -> Self {
        Self {
            store,
            min_similarity,
        }
    }
}

#[async_trait]
impl LexicalBackend for TrigramBackend {
    fn name(&self) -> &'static str {
        "trigram"
    }

    async fn search(&self, query: &LexicalQuery) -> SearchkitResult<Vec<LexicalHit>> {
        self.store.trigram_search(query, self.min_similarity).await
    }
}

/// Token occurrence search over raw native-script documents.
pub struct NativeScriptBackend {
    store: Arc<dyn SearchStore>,
    prefix: bool,
    score_k: f32,
}

impl NativeScriptBackend {
    /// Native-script search; `prefix` matches tokens as prefixes.
    pub fn new(store: Arc<dyn SearchStore>, prefix: bool, score_k: f32) -> Self {
        Self {
            store,
            prefix,
            score_k,
        }
    }
}

#[async_trait]
impl LexicalBackend for NativeScriptBackend {
    fn name(&self) -> &'static str {
        if self.prefix {
            "native_prefix"
        } else {
            "native"
        }
    }

    async fn search(&self, query: &LexicalQuery) -> SearchkitResult<Vec<LexicalHit>> {
        self.store
            .native_search(query, self.prefix, self.score_k)
            .await
    }
}

/// Exact or approximate-then-exact vector retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum VectorMode {
    /// Exact cosine over every stored vector; the floor applies only when positive.
    SingleStage,
    /// Hamming candidates (`limit × oversample_factor`) rescored by exact cosine;
    /// the floor always applies.
    TwoStage {
        /// Candidates per requested result.
        oversample_factor: usize,
    },
}

impl VectorMode {
    /// Two-stage when `two_stage`, with the factor normalised.
    pub fn from_flags(two_stage: bool, oversample_factor: usize) -> Self {
        if !two_stage {
            return Self::SingleStage;
        }
        let oversample_factor = if oversample_factor <= 1 {
            DEFAULT_OVERSAMPLE_FACTOR
        } else {
            oversample_factor
        };
        Self::TwoStage { oversample_factor }
    }
}

/// Vector retrieval against the store.
pub struct StoreVectorBackend {
    store: Arc<dyn SearchStore>,
    mode: VectorMode,
}

impl StoreVectorBackend {
    /// Vector search over `store` in `mode`.
    pub fn new(store: Arc<dyn SearchStore>, mode: VectorMode) -> Self {
        Self { store, mode }
    }

    /// The retrieval mode.
    pub fn mode(&self) -> VectorMode {
        self.mode
    }
}

#[async_trait]
impl VectorBackend for StoreVectorBackend {
    async fn knn(&self, query: &VectorQuery) -> SearchkitResult<Vec<VectorHit>> {
        if query.vector.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        match self.mode {
            VectorMode::SingleStage => self.store.knn(query).await,
            VectorMode::TwoStage { oversample_factor } => {
                let n = query.limit.saturating_mul(oversample_factor.max(1));
                let candidates = self.store.hamming_candidates(query, n).await?;
                let considered = candidates.len();
                let hits = rescore(candidates, &query.vector, query.min_similarity, query.limit);
                debug!(
                    model = %query.model,
                    oversample = n,
                    considered,
                    kept = hits.len(),
                    "Two-stage rescoring"
                );
                Ok(hits)
            }
        }
    }
}

impl std::fmt::Debug for StoreVectorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreVectorBackend")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Merge lexical lists keeping each entity's best score, best-first with ties
/// broken by entity.
pub(crate) fn merge_max_score<I>(lists: I) -> Vec<LexicalHit>
where
    I: IntoIterator<Item = Vec<LexicalHit>>,
{
    let mut best: BTreeMap<EntityRef, f32> = BTreeMap::new();
    for hit in lists.into_iter().flatten() {
        best.entry(hit.entity)
            .and_modify(|s| *s = s.max(hit.score))
            .or_insert(hit.score);
    }
    let mut out: Vec<LexicalHit> = best
        .into_iter()
        .map(|(entity, score)| LexicalHit { entity, score })
        .collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.entity.cmp(&b.entity)));
    out
}
