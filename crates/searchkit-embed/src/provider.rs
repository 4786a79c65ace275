use async_trait::async_trait;
use searchkit_core::{SearchkitError, SearchkitResult};
use serde::{Deserialize, Serialize};

/// What an asset URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// A still image.
    Image,
    /// A frame extracted from a video.
    Frame,
    /// A full video file.
    Video,
}

/// A provider-fetchable asset (presigned or public URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetUrl {
    /// Asset kind.
    pub kind: AssetKind,
    /// URL the provider downloads.
    pub url: String,
}

impl AssetUrl {
    /// Creates an asset reference.
    pub fn new(kind: AssetKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }
}

/// Trait for computing text embeddings.
///
/// Implementations classify their failures with
/// [`ErrorKind`](searchkit_core::ErrorKind) at the boundary; the worker never
/// inspects error messages.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Canonical model name this embedder serves.
    fn model(&self) -> &str;

    /// Output dimension, or `0` when the provider decides.
    fn dimensions(&self) -> usize;

    /// Embed one text.
    async fn embed_text(&self, text: &str) -> SearchkitResult<Vec<f32>> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(SearchkitError::transient(format!(
                "expected 1 embedding, got {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }

    /// Embed a batch; the result has one vector per input, in order.
    async fn embed_texts(&self, texts: &[String]) -> SearchkitResult<Vec<Vec<f32>>>;
}

/// Trait for vision-language embedders that fuse text and assets.
#[async_trait]
pub trait VlEmbedder: Send + Sync {
    /// Canonical model name this embedder serves.
    fn model(&self) -> &str;

    /// Output dimension, or `0` when the provider decides.
    fn dimensions(&self) -> usize;

    /// Embed `text` together with `assets` into one vector.
    async fn embed_text_and_asset_urls(
        &self,
        text: &str,
        assets: &[AssetUrl],
    ) -> SearchkitResult<Vec<f32>>;
}
