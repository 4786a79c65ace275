//! Embedding providers for searchkit.
//!
//! Defines the text and vision-language embedder traits the worker dispatches
//! to, the L2 helpers every stored vector passes through, a deterministic
//! local embedder for development and tests, and an adapter for any
//! OpenAI-compatible `/embeddings` endpoint.
//!
//! # Main types
//!
//! - [`TextEmbedder`]: Batch text embedding with a fixed model and dimension.
//! - [`VlEmbedder`]: Text plus asset URLs fused into one vector.
//! - [`LocalEmbedding`]: Hashed bag-of-words embedder, no network.
//! - [`OpenAiCompatibleEmbedder`]: HTTP adapter with retry classification.

/// Local hashing embedder.
pub mod local;
/// L2 normalisation and vector fusion.
pub mod normalize;
/// OpenAI-compatible HTTP adapter.
pub mod openai;
/// Embedder traits and asset types.
pub mod provider;

pub use local::LocalEmbedding;
pub use normalize::{fuse_average_l2, l2_normalize_in_place};
pub use openai::{map_canonical_model, OpenAiCompatibleEmbedder};
pub use provider::{AssetKind, AssetUrl, TextEmbedder, VlEmbedder};
