use crate::collaborators::{
    AssetUrlLister, EntityPager, LexicalDocumentBuilder, SemanticDocumentBuilder,
};
use searchkit_core::{Modality, ModelSpec, SearchkitError, SearchkitResult};
use searchkit_embed::{AssetUrl, TextEmbedder, VlEmbedder};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Models, embedders and host collaborators wired together.
///
/// Built once by the host and shared by the worker, backfill engine and
/// reconciler.
pub struct Runtime {
    models: BTreeMap<String, ModelSpec>,
    text_embedders: BTreeMap<String, Arc<dyn TextEmbedder>>,
    vl_embedders: BTreeMap<String, Arc<dyn VlEmbedder>>,
    semantic_builder: Arc<dyn SemanticDocumentBuilder>,
    lexical_builder: Option<Arc<dyn LexicalDocumentBuilder>>,
    asset_lister: Option<Arc<dyn AssetUrlLister>>,
    pager: Option<Arc<dyn EntityPager>>,
}

impl Runtime {
    /// A runtime with no models, embedding documents from `semantic_builder`.
    pub fn new(semantic_builder: Arc<dyn SemanticDocumentBuilder>) -> Self {
        Self {
            models: BTreeMap::new(),
            text_embedders: BTreeMap::new(),
            vl_embedders: BTreeMap::new(),
            semantic_builder,
            lexical_builder: None,
            asset_lister: None,
            pager: None,
        }
    }

    /// Register a text model served by `embedder`.
    pub fn with_text_model(mut self, dims: usize, embedder: Arc<dyn TextEmbedder>) -> Self {
        let name = embedder.model().trim().to_string();
        self.models
            .insert(name.clone(), ModelSpec::new(name.clone(), dims, Modality::Text));
        self.vl_embedders.remove(&name);
        self.text_embedders.insert(name, embedder);
        self
    }

    /// Register a vision-language model served by `embedder`.
    pub fn with_vl_model(mut self, dims: usize, embedder: Arc<dyn VlEmbedder>) -> Self {
        let name = embedder.model().trim().to_string();
        self.models
            .insert(name.clone(), ModelSpec::new(name.clone(), dims, Modality::Vl));
        self.text_embedders.remove(&name);
        self.vl_embedders.insert(name, embedder);
        self
    }

    /// Register a model spec without an embedder. Tasks for it dead-letter.
    pub fn with_model_spec(mut self, spec: ModelSpec) -> Self {
        self.models.insert(spec.name.trim().to_string(), spec);
        self
    }

    /// Builder for lexical documents.
    pub fn with_lexical_builder(mut self, builder: Arc<dyn LexicalDocumentBuilder>) -> Self {
        self.lexical_builder = Some(builder);
        self
    }

    /// Asset lister for vision-language models.
    pub fn with_asset_lister(mut self, lister: Arc<dyn AssetUrlLister>) -> Self {
        self.asset_lister = Some(lister);
        self
    }

    /// Entity pager for backfill.
    pub fn with_pager(mut self, pager: Arc<dyn EntityPager>) -> Self {
        self.pager = Some(pager);
        self
    }

    /// Checks every spec and that vision-language models can list assets.
    pub fn validate(&self) -> SearchkitResult<()> {
        for spec in self.models.values() {
            spec.validate()?;
        }
        if !self.vl_embedders.is_empty() && self.asset_lister.is_none() {
            return Err(SearchkitError::Config(
                "vision-language models require an asset URL lister".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured model specs sorted by name.
    pub fn model_specs(&self) -> Vec<ModelSpec> {
        self.models.values().cloned().collect()
    }

    /// Whether `model` is a registered vision-language model.
    pub fn is_vl_model(&self, model: &str) -> bool {
        self.models
            .get(model)
            .is_some_and(|s| s.modality == Modality::Vl)
    }

    /// Text embedder for `model`.
    pub fn text_embedder(&self, model: &str) -> Option<Arc<dyn TextEmbedder>> {
        self.text_embedders.get(model).cloned()
    }

    /// Vision-language embedder for `model`.
    pub fn vl_embedder(&self, model: &str) -> Option<Arc<dyn VlEmbedder>> {
        self.vl_embedders.get(model).cloned()
    }

    /// Lexical document builder, when configured.
    pub fn lexical_builder(&self) -> Option<Arc<dyn LexicalDocumentBuilder>> {
        self.lexical_builder.clone()
    }

    /// Entity pager, when configured.
    pub fn pager(&self) -> Option<Arc<dyn EntityPager>> {
        self.pager.clone()
    }

    pub(crate) async fn build_semantic(
        &self,
        entity_type: &str,
        language: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeMap<String, String>> {
        self.semantic_builder.build(entity_type, language, ids).await
    }

    pub(crate) async fn list_assets(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeMap<String, Vec<AssetUrl>>> {
        match &self.asset_lister {
            Some(lister) => lister.list(entity_type, ids).await,
            None => Err(SearchkitError::Config(
                "no asset URL lister configured".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("lexical_builder", &self.lexical_builder.is_some())
            .field("asset_lister", &self.asset_lister.is_some())
            .field("pager", &self.pager.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryCorpus;
    use searchkit_embed::LocalEmbedding;

    #[test]
    fn test_models_sorted_and_classified() {
        let corpus = Arc::new(MemoryCorpus::new());
        let runtime = Runtime::new(corpus.clone())
            .with_text_model(16, Arc::new(LocalEmbedding::new("zeta-text", 16)))
            .with_vl_model(8, Arc::new(LocalEmbedding::new("alpha-vl", 8)))
            .with_asset_lister(corpus);
        let names: Vec<String> = runtime.model_specs().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["alpha-vl", "zeta-text"]);
        assert!(runtime.is_vl_model("alpha-vl"));
        assert!(!runtime.is_vl_model("zeta-text"));
        assert!(!runtime.is_vl_model("unknown"));
        assert!(runtime.text_embedder("zeta-text").is_some());
        assert!(runtime.vl_embedder("zeta-text").is_none());
        runtime.validate().unwrap();
    }

    #[test]
    fn test_vl_requires_asset_lister() {
        let runtime = Runtime::new(Arc::new(MemoryCorpus::new()))
            .with_vl_model(8, Arc::new(LocalEmbedding::new("vl", 8)));
        assert!(matches!(runtime.validate(), Err(SearchkitError::Config(_))));
    }

    #[test]
    fn test_bad_spec_rejected() {
        let runtime = Runtime::new(Arc::new(MemoryCorpus::new()))
            .with_model_spec(ModelSpec::new("broken", 0, Modality::Text));
        assert!(runtime.validate().is_err());
    }
}
