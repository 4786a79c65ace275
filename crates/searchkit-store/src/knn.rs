//! Vector encoding and brute-force nearest-neighbour ranking.
//!
//! Vectors are persisted as little-endian `f32` BLOBs next to a binary
//! quantisation (one bit per dimension, set when the component is positive).
//! Stage 1 of two-stage retrieval ranks by Hamming distance between
//! quantisations; stage 2 rescores the survivors by exact cosine similarity.

use crate::records::{VectorCandidate, VectorMatch};

/// Encodes a vector as little-endian `f32` bytes.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decodes little-endian `f32` bytes. Trailing bytes that do not form a full
/// component are ignored.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Binary quantisation: bit `i` (LSB-first within each byte) is set when
/// `vector[i] > 0`.
pub fn quantize(vector: &[f32]) -> Vec<u8> {
    let mut bits = vec![0u8; vector.len().div_ceil(8)];
    for (i, v) in vector.iter().enumerate() {
        if *v > 0.0 {
            bits[i / 8] |= 1 << (i % 8);
        }
    }
    bits
}

/// Number of differing bits. Bytes present in only one input count fully.
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    let common: u32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum();
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let tail: u32 = longer[shorter.len()..]
        .iter()
        .map(|x| x.count_ones())
        .sum();
    common + tail
}

/// Cosine similarity; `0.0` for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Sorts by similarity descending, then entity ascending, and truncates.
pub fn top_by_similarity(mut matches: Vec<VectorMatch>, limit: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.entity.cmp(&b.entity))
    });
    matches.truncate(limit);
    matches
}

/// Keeps the `n` candidates closest by Hamming distance, ties broken by entity.
pub fn top_by_hamming(mut candidates: Vec<VectorCandidate>, n: usize) -> Vec<VectorCandidate> {
    candidates.sort_by(|a, b| {
        a.hamming
            .cmp(&b.hamming)
            .then_with(|| a.entity.cmp(&b.entity))
    });
    candidates.truncate(n);
    candidates
}

/// Stage 2: exact cosine over stage-1 candidates.
///
/// Candidates below `min_similarity` are always dropped, including when the
/// floor is zero (negative similarities never survive rescoring).
pub fn rescore(
    candidates: Vec<VectorCandidate>,
    query: &[f32],
    min_similarity: f32,
    limit: usize,
) -> Vec<VectorMatch> {
    let scored = candidates
        .into_iter()
        .filter_map(|c| {
            let similarity = cosine_similarity(query, &c.vector);
            (similarity >= min_similarity).then_some(VectorMatch {
                entity: c.entity,
                similarity,
            })
        })
        .collect();
    top_by_similarity(scored, limit)
}
