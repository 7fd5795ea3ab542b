//! Rank fusion across retrieval sources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::memory::{MemoryId, ScoredId};

/// A retrieval source contributing a ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// Vector similarity from the HNSW index
    Semantic,
    /// BM25 over full content
    FullText,
    /// Expanded-term keyword overlap
    Keyword,
}

impl std::fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semantic => write!(f, "semantic"),
            Self::FullText => write!(f, "full_text"),
            Self::Keyword => write!(f, "keyword"),
        }
    }
}

/// Per-source fusion weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceWeights {
    pub semantic: f64,
    pub full_text: f64,
    pub keyword: f64,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            semantic: 1.0,
            full_text: 0.8,
            keyword: 0.6,
        }
    }
}

impl SourceWeights {
    pub fn get(&self, source: RetrievalSource) -> f64 {
        match source {
            RetrievalSource::Semantic => self.semantic,
            RetrievalSource::FullText => self.full_text,
            RetrievalSource::Keyword => self.keyword,
        }
    }
}

/// Configuration for [`RankFusionEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// RRF damping constant
    pub k: f64,
    pub weights: SourceWeights,
    /// Fused entries scoring below this are dropped
    pub min_score: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            weights: SourceWeights::default(),
            min_score: 0.0,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.k.is_finite() || self.k <= 0.0 {
            return Err(Error::Config(format!("fusion k must be positive, got {}", self.k)));
        }
        let w = &self.weights;
        if [w.semantic, w.full_text, w.keyword]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
        {
            return Err(Error::Config("source weights must be non-negative".into()));
        }
        Ok(())
    }
}

/// One source's results, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedList {
    pub source: RetrievalSource,
    pub results: Vec<ScoredId>,
}

impl RankedList {
    pub fn new(source: RetrievalSource, results: Vec<ScoredId>) -> Self {
        Self { source, results }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Where a fused id was found in one source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRank {
    pub source: RetrievalSource,
    /// 1-based
    pub rank: usize,
    pub original_score: f64,
}

/// A fused result. Built per query and discarded after the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RrfResult {
    pub id: MemoryId,
    pub fused_score: f64,
    pub per_source_ranks: Vec<SourceRank>,
}

impl RrfResult {
    fn new(id: MemoryId) -> Self {
        Self {
            id,
            fused_score: 0.0,
            per_source_ranks: Vec::new(),
        }
    }

    pub fn rank_in(&self, source: RetrievalSource) -> Option<usize> {
        self.per_source_ranks
            .iter()
            .find(|r| r.source == source)
            .map(|r| r.rank)
    }
}

/// Accumulates fused results keyed by id while preserving first-seen order.
#[derive(Default)]
struct Accumulator {
    results: Vec<RrfResult>,
    positions: HashMap<MemoryId, usize>,
}

impl Accumulator {
    fn entry(&mut self, id: MemoryId) -> &mut RrfResult {
        let idx = match self.positions.get(&id) {
            Some(idx) => *idx,
            None => {
                self.results.push(RrfResult::new(id));
                self.positions.insert(id, self.results.len() - 1);
                self.results.len() - 1
            }
        };
        &mut self.results[idx]
    }

    /// Sort best first, keeping first-seen order on ties, and drop entries below `min_score`.
    fn finish(mut self, min_score: f64) -> Vec<RrfResult> {
        self.results.retain(|r| r.fused_score >= min_score);
        self.results.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
        self.results
    }
}

/// Merges ranked candidate lists from independent sources.
#[derive(Debug, Clone, Default)]
pub struct RankFusionEngine {
    config: FusionConfig,
}

impl RankFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Reciprocal Rank Fusion.
    ///
    /// Each id at 1-based `rank` in a source contributes
    /// `weight(source) / (k + rank)`. An id counts once per source, at its
    /// best rank there.
    pub fn fuse_by_rank(&self, sources: &[RankedList]) -> Vec<RrfResult> {
        let k = self.config.k;
        let mut acc = Accumulator::default();

        for list in sources {
            let weight = self.config.weights.get(list.source);
            for (idx, hit) in list.results.iter().enumerate() {
                let entry = acc.entry(hit.id);
                if entry.rank_in(list.source).is_some() {
                    continue;
                }
                let rank = idx + 1;
                entry.fused_score += weight / (k + rank as f64);
                entry.per_source_ranks.push(SourceRank {
                    source: list.source,
                    rank,
                    original_score: hit.score,
                });
            }
        }

        acc.finish(self.config.min_score)
    }

    /// Score-based fusion.
    ///
    /// Scores are normalized by each source's own maximum, scaled by the
    /// source weight, and combined per id by maximum. Sources whose best
    /// score is not positive contribute zero.
    pub fn fuse_by_weighted_score(&self, sources: &[RankedList]) -> Vec<RrfResult> {
        let mut acc = Accumulator::default();

        for list in sources {
            let weight = self.config.weights.get(list.source);
            let max = list
                .results
                .iter()
                .map(|r| r.score)
                .fold(f64::NEG_INFINITY, f64::max);

            for (idx, hit) in list.results.iter().enumerate() {
                let normalized = if max > 0.0 { (hit.score / max).max(0.0) } else { 0.0 };
                let entry = acc.entry(hit.id);
                if entry.rank_in(list.source).is_some() {
                    continue;
                }
                entry.fused_score = entry.fused_score.max(normalized * weight);
                entry.per_source_ranks.push(SourceRank {
                    source: list.source,
                    rank: idx + 1,
                    original_score: hit.score,
                });
            }
        }

        acc.finish(self.config.min_score)
    }

    /// MMR-diversify a fused ranking. See [`super::diversify`].
    pub fn diversify<'a, F>(&self, ranked: &[RrfResult], embedding_of: F, lambda: f64, limit: usize) -> Vec<RrfResult>
    where
        F: Fn(&MemoryId) -> Option<&'a [f32]>,
    {
        super::mmr::diversify(ranked, embedding_of, lambda, limit)
    }
}
