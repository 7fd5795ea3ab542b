//! Maximal Marginal Relevance diversification.

use crate::index::cosine_similarity;
use crate::memory::MemoryId;

use super::rrf::RrfResult;

/// Reorder `ranked` to trade relevance against redundancy.
///
/// Repeatedly picks the unselected candidate maximizing
/// `λ·relevance − (1−λ)·max_sim_to_selected`, where relevance is the fused
/// score divided by the best fused score and `max_sim_to_selected` is the
/// highest cosine similarity to anything already chosen (0 before the first
/// pick, and possibly negative after). A missing embedding on either side
/// counts as similarity 0.
/// Ties go to the earlier candidate.
pub fn diversify<'a, F>(ranked: &[RrfResult], embedding_of: F, lambda: f64, limit: usize) -> Vec<RrfResult>
where
    F: Fn(&MemoryId) -> Option<&'a [f32]>,
{
    if ranked.is_empty() || limit == 0 {
        return Vec::new();
    }
    let lambda = lambda.clamp(0.0, 1.0);

    let max_score = ranked
        .iter()
        .map(|r| r.fused_score)
        .fold(f64::NEG_INFINITY, f64::max);
    let relevance: Vec<f64> = ranked
        .iter()
        .map(|r| if max_score > 0.0 { r.fused_score / max_score } else { 0.0 })
        .collect();
    let embeddings: Vec<Option<&[f32]>> = ranked.iter().map(|r| embedding_of(&r.id)).collect();

    let mut remaining: Vec<usize> = (0..ranked.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(limit.min(ranked.len()));
    // Highest similarity of each candidate to the selected set so far
    let mut max_sim = vec![f64::NEG_INFINITY; ranked.len()];

    while selected.len() < limit && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let penalty = if selected.is_empty() { 0.0 } else { max_sim[idx] };
            let score = lambda * relevance[idx] - (1.0 - lambda) * penalty;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        let chosen = remaining.remove(best_pos);
        selected.push(chosen);

        for &idx in &remaining {
            let sim = match (embeddings[chosen], embeddings[idx]) {
                (Some(a), Some(b)) => cosine_similarity(a, b) as f64,
                _ => 0.0,
            };
            max_sim[idx] = max_sim[idx].max(sim);
        }
    }

    selected.into_iter().map(|i| ranked[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn result(score: f64) -> RrfResult {
        RrfResult {
            id: MemoryId::new(),
            fused_score: score,
            per_source_ranks: Vec::new(),
        }
    }

    #[test]
    fn test_lambda_one_keeps_relevance_order() {
        let ranked = vec![result(0.3), result(0.2), result(0.1)];
        let out = diversify(&ranked, |_| None, 1.0, 10);
        let ids: Vec<_> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, ranked.iter().map(|r| r.id).collect::<Vec<_>>());
    }

    #[test]
    fn test_penalizes_near_duplicates() {
        let ranked = vec![result(0.30), result(0.29), result(0.20)];
        let mut embeddings: HashMap<MemoryId, Vec<f32>> = HashMap::new();
        embeddings.insert(ranked[0].id, vec![1.0, 0.0]);
        embeddings.insert(ranked[1].id, vec![0.99, 0.01]);
        embeddings.insert(ranked[2].id, vec![0.0, 1.0]);

        let out = diversify(&ranked, |id| embeddings.get(id).map(Vec::as_slice), 0.5, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, ranked[0].id);
        assert_eq!(out[1].id, ranked[2].id);
    }

    #[test]
    fn test_opposite_direction_is_rewarded() {
        let ranked = vec![result(1.0), result(0.95), result(0.90)];
        let mut embeddings: HashMap<MemoryId, Vec<f32>> = HashMap::new();
        embeddings.insert(ranked[0].id, vec![1.0, 0.0]);
        embeddings.insert(ranked[1].id, vec![0.0, 1.0]);
        embeddings.insert(ranked[2].id, vec![-1.0, 0.0]);

        // 0.5 * 0.90 + 0.5 * 1.0 beats 0.5 * 0.95 - 0.5 * 0.0
        let out = diversify(&ranked, |id| embeddings.get(id).map(Vec::as_slice), 0.5, 2);
        assert_eq!(out[1].id, ranked[2].id);
    }

    #[test]
    fn test_respects_limit_and_empty() {
        let ranked = vec![result(0.3), result(0.2)];
        assert_eq!(diversify(&ranked, |_| None, 0.7, 1).len(), 1);
        assert!(diversify(&ranked, |_| None, 0.7, 0).is_empty());
        assert!(diversify(&[], |_| None, 0.7, 5).is_empty());
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        let ranked = vec![result(0.1), result(0.5), result(0.2)];
        let out = diversify(&ranked, |_| None, 0.3, 3);
        assert_eq!(out[0].id, ranked[1].id);
    }
}
