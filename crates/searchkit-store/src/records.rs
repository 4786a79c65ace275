use chrono::{DateTime, Utc};
use searchkit_core::EntityRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A stored lexical document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    /// Entity the document describes.
    pub entity: EntityRef,
    /// Trimmed host text, searched by the native-script backend.
    pub raw_document: String,
    /// Normalised text, searched by the keyword and trigram backends.
    pub document: String,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a document batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentWrite {
    /// Rows inserted or updated.
    pub upserted: usize,
    /// Rows removed because their text normalised to empty.
    pub deleted: usize,
}

/// A lexical query against one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalQuery {
    /// Query text as typed.
    pub query: String,
    /// Document language to search.
    pub language: String,
    /// Entity types to include; empty means all.
    #[serde(default)]
    pub entity_types: Vec<String>,
    /// Maximum hits returned.
    pub limit: usize,
}

impl LexicalQuery {
    /// A query over every entity type.
    pub fn new(query: impl Into<String>, language: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            language: language.into(),
            entity_types: Vec::new(),
            limit,
        }
    }

    /// Restricts the query to `entity_types`.
    pub fn with_entity_types(mut self, entity_types: Vec<String>) -> Self {
        self.entity_types = entity_types;
        self
    }

    pub(crate) fn accepts_type(&self, entity_type: &str) -> bool {
        self.entity_types.is_empty() || self.entity_types.iter().any(|t| t == entity_type)
    }
}

/// One lexical hit; higher scores rank first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMatch {
    /// Matching entity.
    pub entity: EntityRef,
    /// Backend-specific relevance score.
    pub score: f32,
}

/// Restrictions applied to vector queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorFilter {
    /// Entity types to include; empty means all.
    #[serde(default)]
    pub entity_types: Vec<String>,
    /// Entity ids to drop from results.
    #[serde(default)]
    pub exclude_ids: BTreeSet<String>,
    /// `(entity_type, entity_id)` pairs to drop from results.
    #[serde(default)]
    pub exclude_entities: BTreeSet<(String, String)>,
    /// Restrict to one language.
    #[serde(default)]
    pub language: Option<String>,
}

impl VectorFilter {
    /// Whether a stored vector of `entity` passes the filter.
    pub fn accepts(&self, entity: &EntityRef) -> bool {
        if !self.entity_types.is_empty()
            && !self.entity_types.iter().any(|t| *t == entity.entity_type)
        {
            return false;
        }
        if self.exclude_ids.contains(&entity.entity_id) {
            return false;
        }
        if !self.exclude_entities.is_empty()
            && self
                .exclude_entities
                .contains(&(entity.entity_type.clone(), entity.entity_id.clone()))
        {
            return false;
        }
        match &self.language {
            Some(language) => *language == entity.language,
            None => true,
        }
    }
}

/// A nearest-neighbour query over one model's vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    /// Model whose vectors are searched.
    pub model: String,
    /// L2-normalised query vector.
    pub vector: Vec<f32>,
    /// Maximum hits returned.
    pub limit: usize,
    /// Similarity floor; see the single- and two-stage rules on the searcher.
    pub min_similarity: f32,
    /// Result restrictions.
    #[serde(default)]
    pub filter: VectorFilter,
}

/// A scored vector hit; higher similarity ranks first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Matching entity.
    pub entity: EntityRef,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

/// A stage-1 candidate carrying its full vector for exact rescoring.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorCandidate {
    /// Candidate entity.
    pub entity: EntityRef,
    /// Hamming distance between the binary quantisations.
    pub hamming: u32,
    /// Stored full-precision vector.
    pub vector: Vec<f32>,
}

/// Outcome of a model registry sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    /// Specs written.
    pub upserted: usize,
    /// Registry rows removed.
    pub models_removed: usize,
    /// Live tasks removed.
    pub tasks_removed: usize,
    /// Vector backfill partitions removed.
    pub backfill_states_removed: usize,
    /// Dead letters removed.
    pub dead_letters_removed: usize,
}

/// Row counts for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Live tasks, leased or not.
    pub tasks: usize,
    /// Live tasks due now.
    pub due_tasks: usize,
    /// Dead-letter rows.
    pub dead_letters: usize,
    /// Stored vectors across all models.
    pub vectors: usize,
    /// Stored lexical documents.
    pub documents: usize,
    /// Pending dirty markers.
    pub dirty_markers: usize,
    /// Registered models.
    pub models: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_filter_rules() {
        let entity = EntityRef::new("gallery", "7", "en");
        assert!(VectorFilter::default().accepts(&entity));

        let by_type = VectorFilter {
            entity_types: vec!["video".into()],
            ..VectorFilter::default()
        };
        assert!(!by_type.accepts(&entity));

        let mut excluded = VectorFilter::default();
        excluded.exclude_ids.insert("7".into());
        assert!(!excluded.accepts(&entity));

        let mut pair = VectorFilter::default();
        pair.exclude_entities
            .insert(("video".into(), "7".into()));
        assert!(pair.accepts(&entity));
        pair.exclude_entities
            .insert(("gallery".into(), "7".into()));
        assert!(!pair.accepts(&entity));

        let by_language = VectorFilter {
            language: Some("ja".into()),
            ..VectorFilter::default()
        };
        assert!(!by_language.accepts(&entity));
    }

    #[test]
    fn test_lexical_query_type_filter() {
        let q = LexicalQuery::new("tokyo", "en", 10);
        assert!(q.accepts_type("anything"));
        let q = q.with_entity_types(vec!["gallery".into()]);
        assert!(q.accepts_type("gallery"));
        assert!(!q.accepts_type("video"));
    }
}
