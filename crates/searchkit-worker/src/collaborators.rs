use async_trait::async_trait;
use parking_lot::RwLock;
use searchkit_core::SearchkitResult;
use searchkit_embed::AssetUrl;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Builds the text that gets embedded for a group of entities.
///
/// Ids missing from the returned map (or mapped to blank text) are treated as
/// deleted entities and their tasks complete without a vector.
#[async_trait]
pub trait SemanticDocumentBuilder: Send + Sync {
    /// Texts keyed by entity id.
    async fn build(
        &self,
        entity_type: &str,
        language: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeMap<String, String>>;
}

/// Builds the text stored for lexical search.
#[async_trait]
pub trait LexicalDocumentBuilder: Send + Sync {
    /// Texts keyed by entity id. Ids absent from the map are left untouched.
    async fn build(
        &self,
        entity_type: &str,
        language: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeMap<String, String>>;
}

/// Lists fetchable asset URLs for vision-language models.
#[async_trait]
pub trait AssetUrlLister: Send + Sync {
    /// Assets keyed by entity id.
    async fn list(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeMap<String, Vec<AssetUrl>>>;
}

/// One page of entity ids from the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Ids on this page.
    pub ids: Vec<String>,
    /// Opaque cursor for the next call.
    pub next_cursor: String,
    /// True when no further pages exist.
    pub done: bool,
}

/// Pages through every entity of a type in one language.
#[async_trait]
pub trait EntityPager: Send + Sync {
    /// Fetch the page after `cursor` (empty for the first page).
    async fn page(
        &self,
        entity_type: &str,
        language: &str,
        cursor: &str,
        page_size: usize,
    ) -> SearchkitResult<Page>;
}

#[derive(Debug, Default, Clone)]
struct CorpusEntry {
    texts: BTreeMap<String, String>,
    assets: Vec<AssetUrl>,
}

/// In-memory entity corpus implementing every collaborator trait.
///
/// The same text serves semantic and lexical documents. Pages are ordered by
/// entity id and the cursor is the last id returned.
#[derive(Debug, Default)]
pub struct MemoryCorpus {
    entities: RwLock<BTreeMap<String, BTreeMap<String, CorpusEntry>>>,
}

impl MemoryCorpus {
    /// An empty corpus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the text of an entity in one language.
    pub fn insert(&self, entity_type: &str, id: &str, language: &str, text: &str) {
        self.entities
            .write()
            .entry(entity_type.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
            .texts
            .insert(language.to_string(), text.to_string());
    }

    /// Replace the assets of an entity.
    pub fn set_assets(&self, entity_type: &str, id: &str, assets: Vec<AssetUrl>) {
        self.entities
            .write()
            .entry(entity_type.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
            .assets = assets;
    }

    /// Drop an entity entirely.
    pub fn remove(&self, entity_type: &str, id: &str) -> bool {
        self.entities
            .write()
            .get_mut(entity_type)
            .is_some_and(|m| m.remove(id).is_some())
    }

    fn texts(&self, entity_type: &str, language: &str, ids: &[String]) -> BTreeMap<String, String> {
        let entities = self.entities.read();
        let Some(by_id) = entities.get(entity_type) else {
            return BTreeMap::new();
        };
        ids.iter()
            .filter_map(|id| {
                let text = by_id.get(id)?.texts.get(language)?;
                Some((id.clone(), text.clone()))
            })
            .collect()
    }
}

#[async_trait]
impl SemanticDocumentBuilder for MemoryCorpus {
    async fn build(
        &self,
        entity_type: &str,
        language: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeMap<String, String>> {
        Ok(self.texts(entity_type, language, ids))
    }
}

#[async_trait]
impl LexicalDocumentBuilder for MemoryCorpus {
    async fn build(
        &self,
        entity_type: &str,
        language: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeMap<String, String>> {
        Ok(self.texts(entity_type, language, ids))
    }
}

#[async_trait]
impl AssetUrlLister for MemoryCorpus {
    async fn list(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeMap<String, Vec<AssetUrl>>> {
        let entities = self.entities.read();
        let Some(by_id) = entities.get(entity_type) else {
            return Ok(BTreeMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                let entry = by_id.get(id)?;
                (!entry.assets.is_empty()).then(|| (id.clone(), entry.assets.clone()))
            })
            .collect())
    }
}

#[async_trait]
impl EntityPager for MemoryCorpus {
    async fn page(
        &self,
        entity_type: &str,
        language: &str,
        cursor: &str,
        page_size: usize,
    ) -> SearchkitResult<Page> {
        let entities = self.entities.read();
        let page_size = page_size.max(1);
        let mut remaining = entities
            .get(entity_type)
            .into_iter()
            .flat_map(|m| m.iter())
            .filter(|(id, entry)| {
                (cursor.is_empty() || id.as_str() > cursor) && entry.texts.contains_key(language)
            })
            .map(|(id, _)| id.clone());

        let ids: Vec<String> = remaining.by_ref().take(page_size).collect();
        let done = remaining.next().is_none();
        let next_cursor = ids.last().cloned().unwrap_or_else(|| cursor.to_string());
        Ok(Page {
            ids,
            next_cursor,
            done,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use searchkit_embed::AssetKind;

    fn corpus() -> MemoryCorpus {
        let corpus = MemoryCorpus::new();
        for id in ["a", "b", "c"] {
            corpus.insert("gallery", id, "en", &format!("gallery {id}"));
        }
        corpus.insert("gallery", "d", "ja", "ギャラリー");
        corpus
    }

    #[tokio::test]
    async fn test_pager_walks_ids_in_order() {
        let corpus = corpus();
        let first = corpus.page("gallery", "en", "", 2).await.unwrap();
        assert_eq!(first.ids, vec!["a", "b"]);
        assert!(!first.done);
        let second = corpus
            .page("gallery", "en", &first.next_cursor, 2)
            .await
            .unwrap();
        assert_eq!(second.ids, vec!["c"]);
        assert!(second.done);
        assert_eq!(second.next_cursor, "c");
    }

    #[tokio::test]
    async fn test_builder_filters_by_language() {
        let corpus = corpus();
        let ids = vec!["a".to_string(), "d".to_string(), "zz".to_string()];
        let en = SemanticDocumentBuilder::build(&corpus, "gallery", "en", &ids)
            .await
            .unwrap();
        assert_eq!(en.keys().collect::<Vec<_>>(), vec!["a"]);
        let ja = LexicalDocumentBuilder::build(&corpus, "gallery", "ja", &ids)
            .await
            .unwrap();
        assert_eq!(ja.get("d").map(String::as_str), Some("ギャラリー"));
    }

    #[tokio::test]
    async fn test_assets_and_removal() {
        let corpus = corpus();
        corpus.set_assets(
            "gallery",
            "a",
            vec![AssetUrl::new(AssetKind::Image, "https://cdn/a.jpg")],
        );
        let ids = vec!["a".to_string(), "b".to_string()];
        let assets = corpus.list("gallery", &ids).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert!(corpus.remove("gallery", "a"));
        assert!(!corpus.remove("gallery", "a"));
        assert!(corpus.list("gallery", &ids).await.unwrap().is_empty());
    }
}
