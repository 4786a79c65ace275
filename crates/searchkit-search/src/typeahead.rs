use crate::backends::{
    merge_max_score, LexicalBackend, LexicalHit, NativeScriptBackend, TrigramBackend,
};
use crate::hybrid::HybridSearcher;
use crate::query::{contains_ascii_alnum, contains_cjk, searchable};
use searchkit_core::SearchkitResult;
use searchkit_store::LexicalQuery;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A suggestion request for partially typed input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeaheadRequest {
    /// Input typed so far.
    pub query: String,
    /// Document language.
    pub language: String,
    /// Entity types suggested; empty means all.
    #[serde(default)]
    pub entity_types: Vec<String>,
    /// Maximum suggestions.
    pub limit: usize,
    /// Score floor; 0 uses the configured trigram floor and keeps every
    /// native-script hit.
    #[serde(default)]
    pub min_similarity: f32,
}

impl TypeaheadRequest {
    /// A request over every entity type.
    pub fn new(query: impl Into<String>, language: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            language: language.into(),
            limit,
            ..Self::default()
        }
    }
}

impl HybridSearcher {
    /// Lexical-only suggestions merged by maximum score per entity.
    pub async fn typeahead(&self, request: &TypeaheadRequest) -> SearchkitResult<Vec<LexicalHit>> {
        let Some(query) = searchable(&request.query) else {
            return Ok(Vec::new());
        };
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let lexical = LexicalQuery::new(query.as_str(), request.language.as_str(), request.limit)
            .with_entity_types(request.entity_types.clone());
        let trigram_floor = if request.min_similarity > 0.0 {
            request.min_similarity
        } else {
            self.options.trigram_min_similarity
        };
        let trigram = TrigramBackend::new(self.store.clone(), trigram_floor);

        let cjk = self.options.is_cjk_language(&request.language);
        let mut legs = Vec::with_capacity(2);
        if !cjk || contains_ascii_alnum(&query) {
            let hits = trigram.search(&lexical).await?;
            debug!(hits = hits.len(), "Typeahead trigram leg");
            legs.push(hits);
        }
        if cjk && contains_cjk(&query) {
            let native =
                NativeScriptBackend::new(self.store.clone(), true, self.options.native_score_k);
            let hits: Vec<LexicalHit> = native
                .search(&lexical)
                .await?
                .into_iter()
                .filter(|h| request.min_similarity <= 0.0 || h.score >= request.min_similarity)
                .collect();
            debug!(hits = hits.len(), "Typeahead native leg");
            legs.push(hits);
        }

        let mut out = merge_max_score(legs);
        out.truncate(request.limit);
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use searchkit_core::SearchOptions;
    use searchkit_store::{DocumentStore, SqliteStore};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    async fn searcher() -> HybridSearcher {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let en: BTreeMap<String, String> = [
            ("1".to_string(), "harbour sunset".to_string()),
            ("2".to_string(), "harbor lights".to_string()),
            ("3".to_string(), "mountain lake".to_string()),
        ]
        .into_iter()
        .collect();
        store.upsert_documents("gallery", "en", &en).await.unwrap();
        let ja: BTreeMap<String, String> = [
            ("10".to_string(), "東京タワー tokyo tower".to_string()),
            ("11".to_string(), "東京駅".to_string()),
            ("12".to_string(), "京都".to_string()),
        ]
        .into_iter()
        .collect();
        store.upsert_documents("gallery", "ja", &ja).await.unwrap();
        HybridSearcher::new(store, SearchOptions::default())
    }

    fn ids(hits: &[LexicalHit]) -> Vec<&str> {
        hits.iter().map(|h| h.entity.entity_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_latin_input_uses_trigrams() {
        let searcher = searcher().await;
        let hits = searcher
            .typeahead(&TypeaheadRequest::new("harbo", "en", 10))
            .await
            .unwrap();
        assert!(ids(&hits).contains(&"1"));
        assert!(ids(&hits).contains(&"2"));
        assert!(!ids(&hits).contains(&"3"));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_native_prefix_in_cjk_language() {
        let searcher = searcher().await;
        let hits = searcher
            .typeahead(&TypeaheadRequest::new("東京", "ja", 10))
            .await
            .unwrap();
        let mut found = ids(&hits);
        found.sort_unstable();
        assert_eq!(found, vec!["10", "11"]);
    }

    #[tokio::test]
    async fn test_mixed_input_merges_by_max() {
        let searcher = searcher().await;
        let hits = searcher
            .typeahead(&TypeaheadRequest::new("東京 tokyo", "ja", 10))
            .await
            .unwrap();
        let tower = hits.iter().filter(|h| h.entity.entity_id == "10").count();
        assert_eq!(tower, 1);
        assert_eq!(hits[0].entity.entity_id, "10");
    }

    #[tokio::test]
    async fn test_native_floor_drops_weak_hits() {
        let searcher = searcher().await;
        let mut request = TypeaheadRequest::new("東京", "ja", 10);
        request.min_similarity = 0.99;
        let hits = searcher.typeahead(&request).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_limit_and_empty_input() {
        let searcher = searcher().await;
        let hits = searcher
            .typeahead(&TypeaheadRequest::new("harbo", "en", 1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        let hits = searcher
            .typeahead(&TypeaheadRequest::new(" ?? ", "en", 5))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
