//! Maximal Marginal Relevance re-ranking.
//!
//! Trades relevance against redundancy: each step picks the candidate
//! maximising `λ·rel − (1−λ)·max_sim_to_selected`. The similarity between two
//! candidates is supplied by the caller, since hits do not carry vectors.

use crate::backends::VectorHit;
use searchkit_core::EntityRef;
use searchkit_store::knn::cosine_similarity;
use std::collections::BTreeMap;

/// Re-rank best-first `hits` down to `k` diverse items.
///
/// `lambda` is clamped to `[0, 1]`; 1 keeps the relevance order. The first hit
/// is always taken first.
pub fn mmr_rerank<F>(hits: &[VectorHit], k: usize, lambda: f32, sim: F) -> Vec<VectorHit>
where
    F: Fn(&VectorHit, &VectorHit) -> f32,
{
    if k == 0 || hits.is_empty() {
        return Vec::new();
    }
    let k = k.min(hits.len());
    let lambda = lambda.clamp(0.0, 1.0);

    let mut remaining: Vec<&VectorHit> = hits.iter().collect();
    let mut selected: Vec<&VectorHit> = Vec::with_capacity(k);
    selected.push(remaining.remove(0));

    while selected.len() < k && !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for (i, candidate) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|s| sim(*candidate, *s))
                .fold(0.0_f32, f32::max);
            let score = lambda * candidate.similarity - (1.0 - lambda) * redundancy;
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        let Some((index, _)) = best else { break };
        selected.push(remaining.remove(index));
    }
    selected.into_iter().cloned().collect()
}

/// [`mmr_rerank`] with cosine similarity between the hits' stored vectors.
///
/// Hits without a vector in `vectors` count as unrelated to everything.
pub fn mmr_rerank_by_vectors(
    hits: &[VectorHit],
    k: usize,
    lambda: f32,
    vectors: &BTreeMap<EntityRef, Vec<f32>>,
) -> Vec<VectorHit> {
    mmr_rerank(hits, k, lambda, |a, b| {
        match (vectors.get(&a.entity), vectors.get(&b.entity)) {
            (Some(va), Some(vb)) => cosine_similarity(va, vb),
            _ => 0.0,
        }
    })
}
