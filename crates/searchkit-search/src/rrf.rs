//! Reciprocal Rank Fusion.
//!
//! `score(item) = Σ weight_l / (k + rank_l(item))` over every list `l` the
//! item appears in, with 1-based ranks. Only raw positions matter, so lists
//! from backends with incomparable score scales fuse cleanly.

use searchkit_core::EntityRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stabilizer used when none (or zero) is configured.
pub const DEFAULT_RRF_K: u32 = 60;

/// Identity of a fused item. Ordering is the deterministic tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RrfKey {
    /// Entity type.
    pub entity_type: String,
    /// Entity id.
    pub entity_id: String,
    /// Document language.
    pub language: String,
    /// Model; empty for lexical hits and for semantic hits fused with them.
    pub model: String,
}

impl RrfKey {
    /// Key of an entity with an empty model.
    pub fn from_entity(entity: &EntityRef) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            entity_id: entity.entity_id.clone(),
            language: entity.language.clone(),
            model: String::new(),
        }
    }

    /// The entity part of the key.
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(&self.entity_type, &self.entity_id, &self.language)
    }
}

/// A fused item and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrfHit {
    /// Item identity.
    pub key: RrfKey,
    /// Fused score; higher ranks first.
    pub score: f32,
}

/// Fusion parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RrfOptions {
    /// Stabilizer constant; 0 means [`DEFAULT_RRF_K`].
    pub k: u32,
    /// Per-list weights by position; missing or non-positive weights are 1.
    #[serde(default)]
    pub weights: Vec<f32>,
    /// Maximum hits returned; 0 keeps every fused item.
    #[serde(default)]
    pub limit: usize,
}

impl RrfOptions {
    /// Options with stabilizer `k` and result cap `limit`.
    pub fn new(k: u32, limit: usize) -> Self {
        Self {
            k,
            weights: Vec::new(),
            limit,
        }
    }

    /// Per-list weights.
    pub fn with_weights(mut self, weights: Vec<f32>) -> Self {
        self.weights = weights;
        self
    }

    fn weight(&self, list: usize) -> f32 {
        match self.weights.get(list) {
            Some(w) if *w > 0.0 => *w,
            _ => 1.0,
        }
    }
}

/// Fuse best-first lists.
///
/// An item repeated within one list is scored at its first position only.
/// Output is sorted by score descending, then key ascending.
pub fn fuse_rrf(lists: &[Vec<RrfKey>], options: &RrfOptions) -> Vec<RrfHit> {
    let k = if options.k == 0 {
        DEFAULT_RRF_K
    } else {
        options.k
    };
    let k = f64::from(k);

    let mut scores: BTreeMap<&RrfKey, f64> = BTreeMap::new();
    for (index, list) in lists.iter().enumerate() {
        let weight = f64::from(options.weight(index));
        let mut seen: BTreeSet<&RrfKey> = BTreeSet::new();
        for (position, key) in list.iter().enumerate() {
            if !seen.insert(key) {
                continue;
            }
            let rank = (position + 1) as f64;
            *scores.entry(key).or_default() += weight / (k + rank);
        }
    }

    let mut hits: Vec<RrfHit> = scores
        .into_iter()
        .map(|(key, score)| RrfHit {
            key: key.clone(),
            score: score as f32,
        })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
    if options.limit > 0 {
        hits.truncate(options.limit);
    }
    hits
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key(id: &str) -> RrfKey {
        RrfKey::from_entity(&EntityRef::new("gallery", id, "en"))
    }

    fn ids(hits: &[RrfHit]) -> Vec<&str> {
        hits.iter().map(|h| h.key.entity_id.as_str()).collect()
    }

    #[test]
    fn test_shared_item_wins() {
        let lists = vec![vec![key("a"), key("b")], vec![key("b"), key("c")]];
        let hits = fuse_rrf(&lists, &RrfOptions::new(60, 0));
        assert_eq!(ids(&hits), vec!["b", "a", "c"]);
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((f64::from(hits[0].score) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_single_list_keeps_order() {
        let lists = vec![vec![key("z"), key("a"), key("m")]];
        let hits = fuse_rrf(&lists, &RrfOptions::default());
        assert_eq!(ids(&hits), vec!["z", "a", "m"]);
    }

    #[test]
    fn test_ties_break_by_key() {
        let lists = vec![vec![key("b")], vec![key("a")]];
        let hits = fuse_rrf(&lists, &RrfOptions::default());
        assert_eq!(ids(&hits), vec!["a", "b"]);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_zero_k_defaults_to_sixty() {
        let lists = vec![vec![key("a")]];
        let hits = fuse_rrf(&lists, &RrfOptions::new(0, 0));
        assert!((f64::from(hits[0].score) - 1.0 / 61.0).abs() < 1e-7);
    }

    #[test]
    fn test_duplicates_count_once_per_list() {
        let lists = vec![vec![key("a"), key("a"), key("b")]];
        let hits = fuse_rrf(&lists, &RrfOptions::default());
        assert!((f64::from(hits[0].score) - 1.0 / 61.0).abs() < 1e-7);
        // b keeps its raw position.
        assert!((f64::from(hits[1].score) - 1.0 / 63.0).abs() < 1e-7);
    }

    #[test]
    fn test_weights_and_limit() {
        let lists = vec![vec![key("a")], vec![key("b")]];
        let opts = RrfOptions::new(60, 1).with_weights(vec![1.0, 3.0]);
        let hits = fuse_rrf(&lists, &opts);
        assert_eq!(ids(&hits), vec!["b"]);

        let opts = RrfOptions::new(60, 0).with_weights(vec![-2.0]);
        let hits = fuse_rrf(&lists, &opts);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_model_is_part_of_identity() {
        let mut semantic = key("a");
        semantic.model = "text".into();
        let lists = vec![vec![key("a")], vec![semantic]];
        assert_eq!(fuse_rrf(&lists, &RrfOptions::default()).len(), 2);
    }

    #[test]
    fn test_empty_lists() {
        assert!(fuse_rrf(&[], &RrfOptions::default()).is_empty());
        assert!(fuse_rrf(&[Vec::new()], &RrfOptions::default()).is_empty());
    }
}
