//! Hybrid lexical and semantic retrieval for searchkit.
//!
//! Queries fan out to script-aware lexical backends and a single- or
//! two-stage vector backend; the ranked lists are fused with Reciprocal Rank
//! Fusion into one deterministic ranking of entities.
//!
//! # Main types
//!
//! - [`HybridSearcher`]: Search, typeahead and similar-to over one store.
//! - [`LexicalBackend`] / [`VectorBackend`]: Ranked retrievers the searcher dispatches to.
//! - [`fuse_rrf`]: Reciprocal Rank Fusion over best-first lists.
//! - [`mmr_rerank`]: Diversity re-ranking of semantic hits.
//! - [`EvalSummary`]: Recall@k and MRR over hand-written cases.

/// Lexical and vector retrieval backends.
pub mod backends;
/// Relevance metrics.
pub mod eval;
/// The hybrid searcher.
pub mod hybrid;
/// Maximal Marginal Relevance.
pub mod mmr;
/// Query text checks.
pub mod query;
/// Reciprocal Rank Fusion.
pub mod rrf;
/// Neighbours of a stored vector.
pub mod similar;
/// Lexical-only suggestions.
pub mod typeahead;

pub use backends::{
    KeywordBackend, LexicalBackend, LexicalHit, NativeScriptBackend, StoreVectorBackend,
    TrigramBackend, VectorBackend, VectorHit, VectorMode,
};
pub use eval::{mrr, recall_at_k, CaseResult, EvalCase, EvalKey, EvalSummary};
pub use hybrid::{HybridSearcher, SearchHit, SearchRequest};
pub use mmr::{mmr_rerank, mmr_rerank_by_vectors};
pub use rrf::{fuse_rrf, RrfHit, RrfKey, RrfOptions};
pub use similar::SimilarRequest;
pub use typeahead::TypeaheadRequest;
