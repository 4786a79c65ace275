//! Durable state for searchkit, backed by SQLite.
//!
//! The store owns every piece of coordination state the pipeline shares
//! between worker instances: the leased task queue, dead letters, the model
//! registry, backfill cursors and dirty markers. It also persists the two
//! searchable corpora (embedding vectors and lexical documents) and answers
//! the ranked queries the retrieval layer fuses.
//!
//! # Main types
//!
//! - [`SqliteStore`]: The SQLite implementation of every store trait.
//! - [`TaskStore`]: Leasing, completion, failure and dead-lettering with fencing.
//! - [`VectorStore`]: Vector persistence, exact KNN and Hamming candidate selection.
//! - [`DocumentStore`]: Lexical documents with keyword, trigram and native-script search.
//! - [`ModelRegistry`]: Active model set and pruning of stale models.
//! - [`SearchStore`]: Umbrella trait implemented by anything that is all of the above.
//! - [`TextNormalizer`]: Lexical normalisation applied to documents and queries.

/// Pure vector encoding, quantisation and similarity functions.
pub mod knn;
/// Pure lexical scoring: trigrams, native-script occurrences, FTS expressions.
pub mod lexical;
/// Text normalisation for lexical documents.
pub mod normalize;
/// Records exchanged with the store.
pub mod records;
/// SQLite implementation.
pub mod sqlite;
/// Store traits.
pub mod traits;

pub use normalize::{BasicNormalizer, TextNormalizer};
pub use records::{
    DocumentMatch, DocumentWrite, LexicalQuery, PruneReport, SearchDocument, StoreStats,
    VectorCandidate, VectorFilter, VectorMatch, VectorQuery,
};
pub use sqlite::SqliteStore;
pub use traits::{
    BackfillStore, DirtyStore, DocumentStore, ModelRegistry, SearchStore, TaskStore, VectorStore,
};
