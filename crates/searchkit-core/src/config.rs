//! Configuration for the searchkit pipeline and retrieval layer.
//!
//! Every field carries a serde default so a partial TOML file is accepted.
//! Zero values are treated as "use the default" by the `normalized` methods,
//! which the worker, backfill engine and searcher call before using options.

use crate::error::{SearchkitError, SearchkitResult};
use crate::types::ModelSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration file (`searchkit.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchkitConfig {
    /// Where the SQLite database lives.
    #[serde(default)]
    pub store: StoreConfig,
    /// Tracing subscriber settings for binaries.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Active embedding models.
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    /// Write-side pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineOptions,
    /// Read-side settings.
    #[serde(default)]
    pub search: SearchOptions,
    /// Optional OpenAI-compatible embedding endpoint.
    #[serde(default)]
    pub embedder: Option<EmbedderConfig>,
}

impl SearchkitConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> SearchkitResult<Self> {
        toml::from_str(content)
            .map_err(|e| SearchkitError::Config(format!("Failed to parse config: {e}")))
    }

    /// Read and parse a TOML file, then validate it.
    pub fn load(path: &Path) -> SearchkitResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SearchkitError::Config(format!(
                "Failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), models = config.models.len(), "Config loaded");
        Ok(config)
    }

    /// Checks model specs and the embedder section.
    pub fn validate(&self) -> SearchkitResult<()> {
        let mut seen = HashSet::new();
        for model in &self.models {
            model.validate()?;
            if !seen.insert(model.name.trim()) {
                return Err(SearchkitError::Config(format!(
                    "model '{}' is configured twice",
                    model.name
                )));
            }
        }
        if let Some(embedder) = &self.embedder {
            if embedder.base_url.trim().is_empty() {
                return Err(SearchkitError::Config("embedder.base_url is required".into()));
            }
            if embedder.model.trim().is_empty() {
                return Err(SearchkitError::Config("embedder.model is required".into()));
            }
        }
        Ok(())
    }
}

/// SQLite location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file path; `":memory:"` opens a private in-memory database.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// How long a writer waits for a competing writer before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

/// Settings of the embedding worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Tasks claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How far `next_run_at` is pushed when a task is claimed.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    /// Delay between ticks of the run loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Concurrent provider calls per worker.
    #[serde(default = "default_max_concurrent_embeds")]
    pub max_concurrent_embeds: usize,
    /// Provider call starts per second; `0` means unlimited.
    #[serde(default)]
    pub max_requests_per_second: f64,
    /// Attempts before a task is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Retry delay cap.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Documents per text embedding request.
    #[serde(default = "default_provider_batch_size")]
    pub provider_batch_size: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lease_ms: default_lease_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_embeds: default_max_concurrent_embeds(),
            max_requests_per_second: 0.0,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            provider_batch_size: default_provider_batch_size(),
        }
    }
}

impl WorkerOptions {
    /// Replaces zero (or negative) values with defaults.
    pub fn normalized(&self) -> Self {
        let d = Self::default();
        Self {
            batch_size: or_default(self.batch_size, d.batch_size),
            lease_ms: or_default(self.lease_ms, d.lease_ms),
            poll_interval_ms: or_default(self.poll_interval_ms, d.poll_interval_ms),
            max_concurrent_embeds: or_default(self.max_concurrent_embeds, d.max_concurrent_embeds),
            max_requests_per_second: if self.max_requests_per_second.is_finite()
                && self.max_requests_per_second > 0.0
            {
                self.max_requests_per_second
            } else {
                0.0
            },
            max_attempts: or_default(self.max_attempts, d.max_attempts),
            backoff_base_ms: or_default(self.backoff_base_ms, d.backoff_base_ms),
            backoff_max_ms: or_default(self.backoff_max_ms, d.backoff_max_ms),
            provider_batch_size: or_default(self.provider_batch_size, d.provider_batch_size),
        }
    }

    /// Lease duration.
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    /// Run-loop tick interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// First retry delay.
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Retry delay cap.
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Budget of one backfill pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillOptions {
    /// Ids requested from the pager per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Enqueues allowed per pass.
    #[serde(default = "default_max_tasks_per_run")]
    pub max_tasks_per_run: usize,
    /// Wall-clock budget per pass.
    #[serde(default = "default_max_runtime_ms")]
    pub max_runtime_ms: u64,
    /// Pages fetched per pass across all partitions.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_tasks_per_run: default_max_tasks_per_run(),
            max_runtime_ms: default_max_runtime_ms(),
            max_pages: default_max_pages(),
        }
    }
}

impl BackfillOptions {
    /// Replaces zero values with defaults.
    pub fn normalized(&self) -> Self {
        let d = Self::default();
        Self {
            page_size: or_default(self.page_size, d.page_size),
            max_tasks_per_run: or_default(self.max_tasks_per_run, d.max_tasks_per_run),
            max_runtime_ms: or_default(self.max_runtime_ms, d.max_runtime_ms),
            max_pages: or_default(self.max_pages, d.max_pages),
        }
    }

    /// Wall-clock budget.
    pub fn max_runtime(&self) -> Duration {
        Duration::from_millis(self.max_runtime_ms)
    }
}

/// Write-side pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Languages documents and vectors are maintained for.
    #[serde(default)]
    pub supported_languages: Vec<String>,
    /// Entity types stored as lexical documents.
    #[serde(default)]
    pub lexical_entity_types: Vec<String>,
    /// Entity types embedded into vectors.
    #[serde(default)]
    pub semantic_entity_types: Vec<String>,
    /// Dirty markers consumed per pass.
    #[serde(default = "default_dirty_batch_size")]
    pub dirty_batch_size: usize,
    /// Interval of the background pipeline loop.
    #[serde(default = "default_pipeline_interval_ms")]
    pub interval_ms: u64,
    /// Embedding worker settings.
    #[serde(default)]
    pub worker: WorkerOptions,
    /// Backfill budget.
    #[serde(default)]
    pub backfill: BackfillOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            supported_languages: Vec::new(),
            lexical_entity_types: Vec::new(),
            semantic_entity_types: Vec::new(),
            dirty_batch_size: default_dirty_batch_size(),
            interval_ms: default_pipeline_interval_ms(),
            worker: WorkerOptions::default(),
            backfill: BackfillOptions::default(),
        }
    }
}

impl PipelineOptions {
    /// Replaces zero values with defaults and trims blank list entries.
    pub fn normalized(&self) -> Self {
        let d = Self::default();
        Self {
            supported_languages: clean_list(&self.supported_languages),
            lexical_entity_types: clean_list(&self.lexical_entity_types),
            semantic_entity_types: clean_list(&self.semantic_entity_types),
            dirty_batch_size: or_default(self.dirty_batch_size, d.dirty_batch_size),
            interval_ms: or_default(self.interval_ms, d.interval_ms),
            worker: self.worker.normalized(),
            backfill: self.backfill.normalized(),
        }
    }

    /// Interval of the background pipeline loop.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Read-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// RRF stabilizer constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    /// Stage-1 candidates per requested result in two-stage mode.
    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: usize,
    /// Use binary-quantized stage 1 plus exact rescoring.
    #[serde(default)]
    pub two_stage: bool,
    /// Similarity floor for semantic hits.
    #[serde(default)]
    pub min_similarity: f32,
    /// Similarity floor for trigram hits.
    #[serde(default = "default_trigram_min_similarity")]
    pub trigram_min_similarity: f32,
    /// Constant `k` of the native-script score normalization `raw / (raw + k)`.
    #[serde(default = "default_native_score_k")]
    pub native_score_k: f32,
    /// Languages whose queries may be typed in either native script or romanization.
    #[serde(default = "default_cjk_languages")]
    pub cjk_languages: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            oversample_factor: default_oversample_factor(),
            two_stage: false,
            min_similarity: 0.0,
            trigram_min_similarity: default_trigram_min_similarity(),
            native_score_k: default_native_score_k(),
            cjk_languages: default_cjk_languages(),
        }
    }
}

impl SearchOptions {
    /// Replaces out-of-range values with defaults.
    pub fn normalized(&self) -> Self {
        let d = Self::default();
        Self {
            rrf_k: or_default(self.rrf_k, d.rrf_k),
            oversample_factor: if self.oversample_factor <= 1 {
                d.oversample_factor
            } else {
                self.oversample_factor
            },
            two_stage: self.two_stage,
            min_similarity: self.min_similarity,
            trigram_min_similarity: if self.trigram_min_similarity > 0.0 {
                self.trigram_min_similarity
            } else {
                d.trigram_min_similarity
            },
            native_score_k: if self.native_score_k > 0.0 {
                self.native_score_k
            } else {
                d.native_score_k
            },
            cjk_languages: self
                .cjk_languages
                .iter()
                .map(|l| l.trim().to_ascii_lowercase())
                .filter(|l| !l.is_empty())
                .collect(),
        }
    }

    /// Whether `language` gets script-aware lexical dispatch.
    pub fn is_cjk_language(&self, language: &str) -> bool {
        let language = language.trim();
        self.cjk_languages
            .iter()
            .any(|l| l.trim().eq_ignore_ascii_case(language))
    }
}

/// OpenAI-compatible embedding endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token; may be empty for local servers.
    #[serde(default)]
    pub api_key: String,
    /// Canonical model name used by the host.
    pub model: String,
    /// Requested output dimension; `None` uses the provider default.
    #[serde(default)]
    pub dimensions: Option<usize>,
    /// Request timeout.
    #[serde(default = "default_embedder_timeout_secs")]
    pub timeout_secs: u64,
    /// Advisory provider hint used for model-id mapping (`deepinfra`, `dashscope`, ...).
    #[serde(default)]
    pub provider: String,
}

trait Zeroable: Copy + PartialEq + Default {}
impl Zeroable for usize {}
impl Zeroable for u64 {}
impl Zeroable for u32 {}

fn or_default<T: Zeroable>(value: T, default: T) -> T {
    if value == T::default() {
        default
    } else {
        value
    }
}

fn clean_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim();
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./searchkit.db")
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_log_filter() -> String {
    "info".to_string()
}
fn default_batch_size() -> usize {
    250
}
fn default_lease_ms() -> u64 {
    30_000
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_max_concurrent_embeds() -> usize {
    8
}
fn default_max_attempts() -> u32 {
    10
}
fn default_backoff_base_ms() -> u64 {
    5_000
}
fn default_backoff_max_ms() -> u64 {
    600_000
}
fn default_provider_batch_size() -> usize {
    25
}
fn default_page_size() -> usize {
    1_000
}
fn default_max_tasks_per_run() -> usize {
    50_000
}
fn default_max_runtime_ms() -> u64 {
    30_000
}
fn default_max_pages() -> usize {
    5
}
fn default_dirty_batch_size() -> usize {
    250
}
fn default_pipeline_interval_ms() -> u64 {
    5_000
}
fn default_rrf_k() -> u32 {
    60
}
fn default_oversample_factor() -> usize {
    5
}
fn default_trigram_min_similarity() -> f32 {
    0.1
}
fn default_native_score_k() -> f32 {
    1.0
}
fn default_cjk_languages() -> Vec<String> {
    vec!["ja".to_string(), "zh".to_string(), "ko".to_string()]
}
fn default_embedder_timeout_secs() -> u64 {
    60
}
