//! Offline relevance metrics for hand-written query cases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An entity as judged by a relevance case (language-agnostic).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvalKey {
    /// Entity type.
    pub entity_type: String,
    /// Entity id.
    pub entity_id: String,
}

impl EvalKey {
    /// Create a key.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// A query and the entities it should find.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalCase {
    /// Case label.
    pub name: String,
    /// Query text.
    pub query: String,
    /// Relevant entities.
    pub expected: Vec<EvalKey>,
}

/// Fraction of `expected` found in the first `k` of `got`.
///
/// 1.0 when nothing is expected; 0.0 when `k` is zero.
pub fn recall_at_k(got: &[EvalKey], expected: &[EvalKey], k: usize) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    if k == 0 {
        return 0.0;
    }
    let wanted: BTreeSet<&EvalKey> = expected.iter().collect();
    let hits = got.iter().take(k).filter(|g| wanted.contains(g)).count();
    hits as f64 / expected.len() as f64
}

/// Reciprocal rank of the first relevant result; 1.0 when nothing is expected.
pub fn mrr(got: &[EvalKey], expected: &[EvalKey]) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    let wanted: BTreeSet<&EvalKey> = expected.iter().collect();
    got.iter()
        .position(|g| wanted.contains(g))
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

/// Metrics of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    /// Case label.
    pub name: String,
    /// Recall at the summary's `k`.
    pub recall: f64,
    /// Reciprocal rank.
    pub mrr: f64,
}

/// Averages over a case set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    /// Cutoff used for recall.
    pub k: usize,
    /// Mean recall@k.
    pub mean_recall: f64,
    /// Mean reciprocal rank.
    pub mean_mrr: f64,
    /// Per-case metrics in input order.
    pub cases: Vec<CaseResult>,
}

impl EvalSummary {
    /// Score `(case, results)` pairs; an empty set averages to zero.
    pub fn from_runs<'a, I>(runs: I, k: usize) -> Self
    where
        I: IntoIterator<Item = (&'a EvalCase, &'a [EvalKey])>,
    {
        let cases: Vec<CaseResult> = runs
            .into_iter()
            .map(|(case, got)| CaseResult {
                name: case.name.clone(),
                recall: recall_at_k(got, &case.expected, k),
                mrr: mrr(got, &case.expected),
            })
            .collect();
        let n = cases.len();
        let mean = |f: fn(&CaseResult) -> f64| {
            if n == 0 {
                0.0
            } else {
                cases.iter().map(f).sum::<f64>() / n as f64
            }
        };
        Self {
            k,
            mean_recall: mean(|c| c.recall),
            mean_mrr: mean(|c| c.mrr),
            cases,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn keys(ids: &[&str]) -> Vec<EvalKey> {
        ids.iter().map(|id| EvalKey::new("gallery", *id)).collect()
    }

    #[test]
    fn test_recall_at_k() {
        let got = keys(&["a", "x", "b", "c"]);
        let expected = keys(&["a", "b"]);
        assert_eq!(recall_at_k(&got, &expected, 1), 0.5);
        assert_eq!(recall_at_k(&got, &expected, 3), 1.0);
        assert_eq!(recall_at_k(&got, &expected, 100), 1.0);
        assert_eq!(recall_at_k(&got, &expected, 0), 0.0);
        assert_eq!(recall_at_k(&got, &[], 0), 1.0);
    }

    #[test]
    fn test_mrr() {
        let expected = keys(&["b"]);
        assert_eq!(mrr(&keys(&["b", "a"]), &expected), 1.0);
        assert_eq!(mrr(&keys(&["a", "x", "b"]), &expected), 1.0 / 3.0);
        assert_eq!(mrr(&keys(&["a"]), &expected), 0.0);
        assert_eq!(mrr(&[], &[]), 1.0);
    }

    #[test]
    fn test_summary_averages_cases() {
        let first = EvalCase {
            name: "first".into(),
            query: "red".into(),
            expected: keys(&["a"]),
        };
        let second = EvalCase {
            name: "second".into(),
            query: "blue".into(),
            expected: keys(&["b"]),
        };
        let got_first = keys(&["a"]);
        let got_second = keys(&["x", "b"]);
        let summary = EvalSummary::from_runs(
            [
                (&first, got_first.as_slice()),
                (&second, got_second.as_slice()),
            ],
            1,
        );
        assert_eq!(summary.cases.len(), 2);
        assert_eq!(summary.mean_recall, 0.5);
        assert_eq!(summary.mean_mrr, 0.75);

        let empty = EvalSummary::from_runs(std::iter::empty(), 5);
        assert_eq!(empty.mean_recall, 0.0);
    }
}
