use crate::normalize::l2_normalize_in_place;
use crate::provider::TextEmbedder;
use async_trait::async_trait;
use searchkit_core::{EmbedderConfig, ErrorKind, SearchkitError, SearchkitResult};
use serde::Deserialize;
use std::time::Duration;

/// Maps a canonical model name to the id a given provider expects.
///
/// Unknown combinations pass the canonical name through unchanged.
pub fn map_canonical_model(canonical: &str, provider: &str) -> String {
    let name = canonical.trim();
    let provider = provider.trim().to_ascii_lowercase();
    if name.eq_ignore_ascii_case("qwen-3-embedding-4b") {
        match provider.as_str() {
            "deepinfra" => return "Qwen/Qwen3-Embedding-4B".to_string(),
            "dashscope" => return "text-embedding-v4".to_string(),
            _ => {}
        }
    }
    name.to_string()
}

/// Embedder for any endpoint speaking the OpenAI `/embeddings` protocol.
///
/// Works with OpenAI, DeepInfra, DashScope compatible mode, vLLM, Ollama and
/// similar servers. Failures are classified here: 408, 429 and 5xx plus
/// transport and decoding errors are transient; other statuses are permanent.
pub struct OpenAiCompatibleEmbedder {
    config: EmbedderConfig,
    provider_model: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiCompatibleEmbedder {
    /// Builds the adapter and its HTTP client.
    pub fn new(config: EmbedderConfig) -> SearchkitResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(SearchkitError::Config(
                "embedder base_url is required".to_string(),
            ));
        }
        if config.model.trim().is_empty() {
            return Err(SearchkitError::Config(
                "embedder model is required".to_string(),
            ));
        }
        let timeout = if config.timeout_secs == 0 {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(config.timeout_secs)
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchkitError::Config(format!("failed to build HTTP client: {e}")))?;
        let provider_model = map_canonical_model(&config.model, &config.provider);
        Ok(Self {
            config,
            provider_model,
            http,
        })
    }

    /// Model id sent on the wire.
    pub fn provider_model(&self) -> &str {
        &self.provider_model
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim().trim_end_matches('/'))
    }
}

impl std::fmt::Debug for OpenAiCompatibleEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleEmbedder")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("provider_model", &self.provider_model)
            .finish_non_exhaustive()
    }
}

fn transport_error(e: &reqwest::Error) -> SearchkitError {
    if e.is_builder() {
        SearchkitError::permanent(format!("invalid embeddings request: {e}"))
    } else {
        SearchkitError::transient(format!("embeddings request failed: {e}"))
    }
}

#[async_trait]
impl TextEmbedder for OpenAiCompatibleEmbedder {
    fn model(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions.unwrap_or(0)
    }

    async fn embed_texts(&self, texts: &[String]) -> SearchkitResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = serde_json::json!({
            "model": self.provider_model,
            "input": texts,
        });
        if let Some(dims) = self.config.dimensions.filter(|d| *d > 0) {
            body["dimensions"] = serde_json::json!(dims);
        }

        let mut request = self.http.post(self.endpoint()).json(&body);
        if !self.config.api_key.trim().is_empty() {
            request = request.bearer_auth(self.config.api_key.trim());
        }

        let resp = request.send().await.map_err(|e| transport_error(&e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let kind = ErrorKind::from_http_status(status.as_u16());
            tracing::warn!(status = status.as_u16(), %kind, "Embeddings request rejected");
            return Err(SearchkitError::Provider {
                kind,
                message: format!("embeddings API error {status}: {text}"),
            });
        }

        let parsed: EmbeddingsResponse = resp.json().await.map_err(|e| {
            SearchkitError::transient(format!("failed to decode embeddings response: {e}"))
        })?;
        if parsed.data.len() != texts.len() {
            return Err(SearchkitError::transient(format!(
                "embeddings count mismatch: sent {}, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut rows = parsed.data;
        rows.sort_by_key(|r| r.index);
        let vectors = rows
            .into_iter()
            .map(|mut row| {
                l2_normalize_in_place(&mut row.embedding);
                row.embedding
            })
            .collect();
        tracing::debug!(model = %self.provider_model, count = texts.len(), "Embedded batch");
        Ok(vectors)
    }
}
