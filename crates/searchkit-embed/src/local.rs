use crate::normalize::{fuse_average_l2, l2_normalize_in_place};
use crate::provider::{AssetUrl, TextEmbedder, VlEmbedder};
use async_trait::async_trait;
use searchkit_core::{SearchkitError, SearchkitResult};
use std::collections::HashMap;

/// Deterministic bag-of-words embedder that needs no network.
///
/// Words are hashed into a fixed number of buckets with three FNV-1a hashes
/// each, weighted by term frequency, then L2-normalised. Useful for local
/// development, the CLI demo corpus and tests; it has no real semantics.
#[derive(Debug, Clone)]
pub struct LocalEmbedding {
    model: String,
    dimensions: usize,
}

impl LocalEmbedding {
    /// Creates an embedder serving `model` with `dimensions` buckets.
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            dimensions: dimensions.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> SearchkitResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(SearchkitError::Validation(
                "cannot embed empty text".to_string(),
            ));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Ok(vector);
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(word).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            for (salt, weight) in [(None, 1.0f32), (Some(1u8), 0.7), (Some(2u8), 0.5)] {
                let hash = match salt {
                    None => fnv1a(word.as_bytes()),
                    Some(s) => fnv1a(&[word.as_bytes(), &[s]].concat()),
                };
                vector[hash as usize % self.dimensions] += tf * weight;
            }
        }

        l2_normalize_in_place(&mut vector);
        Ok(vector)
    }
}

#[async_trait]
impl TextEmbedder for LocalEmbedding {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_texts(&self, texts: &[String]) -> SearchkitResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

#[async_trait]
impl VlEmbedder for LocalEmbedding {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_text_and_asset_urls(
        &self,
        text: &str,
        assets: &[AssetUrl],
    ) -> SearchkitResult<Vec<f32>> {
        let mut parts = Vec::with_capacity(assets.len() + 1);
        if !text.trim().is_empty() {
            parts.push(self.embed_one(text)?);
        }
        for asset in assets {
            parts.push(self.embed_one(&asset.url)?);
        }
        fuse_average_l2(&parts).ok_or_else(|| {
            SearchkitError::Validation("nothing to embed: empty text and no assets".to_string())
        })
    }
}

/// FNV-1a, 32 bit.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
