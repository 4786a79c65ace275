use crate::backends::VectorHit;
use crate::hybrid::HybridSearcher;
use searchkit_core::{SearchkitResult, TaskKey};
use searchkit_store::{VectorFilter, VectorQuery};
use serde::{Deserialize, Serialize};

/// Neighbours of an already embedded entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarRequest {
    /// Vector identity of the source entity.
    pub source: TaskKey,
    /// Maximum neighbours.
    pub limit: usize,
    /// Result restrictions; the source entity is always excluded.
    #[serde(default)]
    pub filter: VectorFilter,
    /// Similarity floor, applied only when positive.
    #[serde(default)]
    pub min_similarity: f32,
}

impl SimilarRequest {
    /// Neighbours of `source` without extra filters.
    pub fn new(source: TaskKey, limit: usize) -> Self {
        Self {
            source,
            limit,
            filter: VectorFilter::default(),
            min_similarity: 0.0,
        }
    }
}

impl HybridSearcher {
    /// Exact nearest neighbours of a stored vector, excluding the source.
    ///
    /// Empty when the source has no stored vector.
    pub async fn similar_to(&self, request: &SimilarRequest) -> SearchkitResult<Vec<VectorHit>> {
        request.source.validate()?;
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let Some(vector) = self.store.get_vector(&request.source).await? else {
            return Ok(Vec::new());
        };
        let mut filter = request.filter.clone();
        filter.exclude_entities.insert((
            request.source.entity_type.clone(),
            request.source.entity_id.clone(),
        ));
        let query = VectorQuery {
            model: request.source.model.clone(),
            vector,
            limit: request.limit,
            min_similarity: request.min_similarity,
            filter,
        };
        self.store.knn(&query).await
    }
}
