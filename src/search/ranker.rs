//! Similarity ranking of candidates against a query vector.
//!
//! Scoring is brute-force cosine similarity over every candidate, O(n·d).
//! Selection keeps a bounded min-heap of `max_results` entries, so only the
//! winners are ever sorted.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::Serialize;
use tracing::{debug, warn};

use super::types::{CandidateId, CandidateRecord, Embedding, ScoredResult};
use crate::error::{Error, Result};

/// Cosine similarity between two equally sized vectors.
///
/// A zero-norm vector on either side yields `0.0` instead of NaN. The result
/// is clamped to `[-1, 1]` to absorb rounding drift.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_nan() {
        return f32::NAN;
    }
    similarity.clamp(-1.0, 1.0) as f32
}

/// Locally recovered condition observed while ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RankAnomaly {
    /// Candidate vector length disagrees with the query; the candidate was skipped.
    DimensionMismatch {
        candidate_id: CandidateId,
        /// Index of the candidate in the input collection
        position: usize,
        expected: usize,
        actual: usize,
    },
}

/// Ranked results plus everything skipped along the way.
#[derive(Debug, Clone, Default)]
pub struct RankOutcome {
    /// Results, best first
    pub results: Vec<ScoredResult>,
    /// Candidates skipped during scoring
    pub anomalies: Vec<RankAnomaly>,
    /// Number of candidates that were actually scored
    pub scored: usize,
}

/// Heap slot. "Greater" means a better match: higher score, then earlier position.
#[derive(Debug, Clone, Copy)]
struct Slot {
    score: f32,
    position: usize,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Slot {}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        // Scores in the heap are never NaN.
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Stateless ranker; safe to share across concurrent requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityRanker;

impl SimilarityRanker {
    pub fn new() -> Self {
        Self
    }

    /// Rank `candidates` against `query`.
    ///
    /// Returns at most `max_results` entries with similarity `>= threshold`,
    /// best first. Exact ties keep input order.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `threshold` is not within `[-1, 1]` or `max_results` is zero.
    pub fn rank(
        &self,
        query: &Embedding,
        candidates: &[CandidateRecord],
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<ScoredResult>> {
        self.rank_with_report(query, candidates, threshold, max_results)
            .map(|outcome| outcome.results)
    }

    /// Same as [`rank`](Self::rank), also reporting skipped candidates.
    pub fn rank_with_report(
        &self,
        query: &Embedding,
        candidates: &[CandidateRecord],
        threshold: f32,
        max_results: usize,
    ) -> Result<RankOutcome> {
        validate_params(threshold, max_results)?;

        let expected = query.dimension();
        let mut anomalies = Vec::new();
        let mut scored = 0usize;
        let mut heap: BinaryHeap<Reverse<Slot>> =
            BinaryHeap::with_capacity(max_results.min(candidates.len()) + 1);

        for (position, candidate) in candidates.iter().enumerate() {
            let actual = candidate.vector.dimension();
            if actual != expected {
                warn!(
                    candidate_id = %candidate.id,
                    expected,
                    actual,
                    "Skipping candidate with mismatched dimension"
                );
                anomalies.push(RankAnomaly::DimensionMismatch {
                    candidate_id: candidate.id.clone(),
                    position,
                    expected,
                    actual,
                });
                continue;
            }

            scored += 1;
            let score = cosine_similarity(query.as_slice(), candidate.vector.as_slice());
            if score.is_nan() || score < threshold {
                continue;
            }

            let slot = Slot { score, position };
            if heap.len() < max_results {
                heap.push(Reverse(slot));
            } else if let Some(Reverse(worst)) = heap.peek() {
                if slot > *worst {
                    heap.pop();
                    heap.push(Reverse(slot));
                }
            }
        }

        let mut winners: Vec<Slot> = heap.into_iter().map(|Reverse(slot)| slot).collect();
        winners.sort_by(|a, b| b.cmp(a));

        let results = winners
            .into_iter()
            .map(|slot| ScoredResult {
                candidate: candidates[slot.position].clone(),
                score: slot.score,
            })
            .collect::<Vec<_>>();

        debug!(
            candidates = candidates.len(),
            scored,
            returned = results.len(),
            skipped = anomalies.len(),
            "Ranking complete"
        );

        Ok(RankOutcome {
            results,
            anomalies,
            scored,
        })
    }
}

fn validate_params(threshold: f32, max_results: usize) -> Result<()> {
    if !(-1.0..=1.0).contains(&threshold) {
        return Err(Error::InvalidInput(format!(
            "similarity_threshold must be within [-1, 1], got {}",
            threshold
        )));
    }
    if max_results == 0 {
        return Err(Error::InvalidInput(
            "max_results must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, vector: Vec<f32>) -> CandidateRecord {
        CandidateRecord::new(id, vector)
    }

    fn ids(results: &[ScoredResult]) -> Vec<CandidateId> {
        results.iter().map(|r| r.candidate.id.clone()).collect()
    }

    // ================================================================
    // Cosine similarity
    // ================================================================

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_is_scale_invariant() {
        let a = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]);
        assert!((a - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    // ================================================================
    // Ranking
    // ================================================================

    #[test]
    fn test_scenario_threshold_and_cap() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![
            CandidateRecord::new("A", vec![1.0, 0.0]),
            CandidateRecord::new("B", vec![0.0, 1.0]),
            CandidateRecord::new("C", vec![0.7, 0.7]),
        ];

        let results = SimilarityRanker::new()
            .rank(&query, &candidates, 0.5, 2)
            .unwrap();

        assert_eq!(ids(&results), vec![CandidateId::from("A"), CandidateId::from("C")]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }

    #[test]
    fn test_dimension_mismatch_is_skipped_and_reported() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![
            record(1, vec![1.0, 0.0, 0.0]),
            record(2, vec![0.9, 0.1]),
        ];

        let outcome = SimilarityRanker::new()
            .rank_with_report(&query, &candidates, 0.3, 10)
            .unwrap();

        assert_eq!(ids(&outcome.results), vec![CandidateId::Num(2)]);
        assert_eq!(outcome.scored, 1);
        assert_eq!(
            outcome.anomalies,
            vec![RankAnomaly::DimensionMismatch {
                candidate_id: CandidateId::Num(1),
                position: 0,
                expected: 2,
                actual: 3,
            }]
        );
    }

    #[test]
    fn test_empty_collection_returns_empty() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let results = SimilarityRanker::new().rank(&query, &[], 0.3, 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_fewer_qualifying_than_cap_returns_all_qualifying() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![
            record(1, vec![0.0, 1.0]),
            record(2, vec![0.8, 0.6]),
            record(3, vec![0.6, 0.8]),
            record(4, vec![-1.0, 0.0]),
        ];

        let results = SimilarityRanker::new()
            .rank(&query, &candidates, 0.3, 10)
            .unwrap();

        assert_eq!(ids(&results), vec![CandidateId::Num(2), CandidateId::Num(3)]);
    }

    #[test]
    fn test_ties_preserve_input_order() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![
            record(10, vec![0.5, 0.5]),
            record(11, vec![1.0, 0.0]),
            record(12, vec![0.5, 0.5]),
            record(13, vec![0.5, 0.5]),
            record(14, vec![0.5, 0.5]),
        ];

        let results = SimilarityRanker::new()
            .rank(&query, &candidates, 0.0, 10)
            .unwrap();
        assert_eq!(
            ids(&results),
            vec![
                CandidateId::Num(11),
                CandidateId::Num(10),
                CandidateId::Num(12),
                CandidateId::Num(13),
                CandidateId::Num(14),
            ]
        );

        // Truncation inside a tie group still keeps the earliest ones.
        let capped = SimilarityRanker::new()
            .rank(&query, &candidates, 0.0, 3)
            .unwrap();
        assert_eq!(
            ids(&capped),
            vec![CandidateId::Num(11), CandidateId::Num(10), CandidateId::Num(12)]
        );
    }

    #[test]
    fn test_zero_vector_only_included_at_non_positive_threshold() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![record(1, vec![0.0, 0.0])];
        let ranker = SimilarityRanker::new();

        assert!(ranker.rank(&query, &candidates, 0.3, 5).unwrap().is_empty());

        let results = ranker.rank(&query, &candidates, 0.0, 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 0.0);
    }

    #[test]
    fn test_nan_components_never_qualify() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![record(1, vec![f32::NAN, 1.0]), record(2, vec![1.0, 0.0])];

        let results = SimilarityRanker::new()
            .rank(&query, &candidates, -1.0, 5)
            .unwrap();
        assert_eq!(ids(&results), vec![CandidateId::Num(2)]);
    }

    #[test]
    fn test_rank_is_idempotent() {
        let query = Embedding::new(vec![0.3, 0.9, 0.1]);
        let candidates: Vec<CandidateRecord> = (0..50)
            .map(|i| {
                let f = i as f32;
                record(i, vec![(f * 0.37).sin(), (f * 0.11).cos(), f / 50.0])
            })
            .collect();
        let ranker = SimilarityRanker::new();

        let first = ranker.rank(&query, &candidates, 0.1, 7).unwrap();
        let second = ranker.rank(&query, &candidates, 0.1, 7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_heap_selection_matches_full_sort() {
        let query = Embedding::new(vec![0.2, -0.4, 0.9, 0.1]);
        let candidates: Vec<CandidateRecord> = (0..200)
            .map(|i| {
                let f = i as f32;
                record(
                    i,
                    vec![(f * 0.7).sin(), (f * 1.3).cos(), (f * 0.05).sin(), 0.25],
                )
            })
            .collect();

        let results = SimilarityRanker::new()
            .rank(&query, &candidates, -0.2, 15)
            .unwrap();

        let mut expected: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query.as_slice(), c.vector.as_slice())))
            .filter(|(_, s)| *s >= -0.2)
            .collect();
        // Stable sort keeps input order on ties.
        expected.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        expected.truncate(15);

        assert_eq!(results.len(), 15);
        for (result, (position, score)) in results.iter().zip(expected) {
            assert_eq!(result.candidate.id, CandidateId::Num(position as u64));
            assert_eq!(result.score, score);
        }
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let query = Embedding::new(vec![1.0]);
        let ranker = SimilarityRanker::new();

        assert!(matches!(
            ranker.rank(&query, &[], 0.3, 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ranker.rank(&query, &[], 1.5, 3),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ranker.rank(&query, &[], f32::NAN, 3),
            Err(Error::InvalidInput(_))
        ));
    }
}
