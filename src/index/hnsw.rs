//! Hierarchical navigable small-world graph.
//!
//! Nodes live in a single arena keyed by [`MemoryId`]; adjacency is stored as
//! id lists per level. Nothing holds a direct reference to another node, so
//! deletion only has to scrub ids out of the remaining lists.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::{MemoryId, ScoredId};

use super::similarity::cosine_similarity;

/// Graph construction and search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum neighbors per node per level (M)
    pub max_connections: usize,
    /// Beam width while inserting
    pub ef_construction: usize,
    /// Beam width while searching; raised to `k` when smaller
    pub ef_search: usize,
    /// Highest level a node may be assigned
    pub max_level: usize,
    /// Seed for level assignment. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            ef_search: 50,
            max_level: 16,
            seed: None,
        }
    }
}

impl IndexConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_connections(mut self, m: usize) -> Self {
        self.max_connections = m;
        self
    }

    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections < 2 {
            return Err(Error::Config(format!(
                "max_connections must be at least 2, got {}",
                self.max_connections
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(Error::Config("ef_construction and ef_search must be positive".into()));
        }
        Ok(())
    }

    /// Probability of climbing one more level: `exp(-1/mL)` with `mL = 1/ln(M)`.
    fn level_probability(&self) -> f64 {
        let ml = 1.0 / (self.max_connections.max(2) as f64).ln();
        (-1.0 / ml).exp()
    }
}

/// A vector in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    pub id: MemoryId,
    pub embedding: Vec<f32>,
    pub level: usize,
    /// `connections[l]` holds the neighbors at level `l`, for `l` in `0..=level`
    pub connections: Vec<Vec<MemoryId>>,
    pub metadata: Option<HashMap<String, Value>>,
    /// Insertion order, used to break entry-point ties
    seq: u64,
}

impl IndexNode {
    pub fn neighbors(&self, level: usize) -> &[MemoryId] {
        self.connections.get(level).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Heap entry ordered by similarity, then id.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    similarity: f32,
    id: MemoryId,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Approximate nearest-neighbor index over cosine similarity.
#[derive(Debug)]
pub struct HnswIndex {
    config: IndexConfig,
    nodes: HashMap<MemoryId, IndexNode>,
    entry_point: Option<MemoryId>,
    dimension: Option<usize>,
    rng: StdRng,
    next_seq: u64,
}

impl HnswIndex {
    pub fn new(config: IndexConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            nodes: HashMap::new(),
            entry_point: None,
            dimension: None,
            rng,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fixed dimension, set by the first insert and kept until [`HnswIndex::clear`].
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn entry_point(&self) -> Option<MemoryId> {
        self.entry_point
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &MemoryId) -> Option<&IndexNode> {
        self.nodes.get(id)
    }

    pub fn embedding(&self, id: &MemoryId) -> Option<&[f32]> {
        self.nodes.get(id).map(|n| n.embedding.as_slice())
    }

    pub fn neighbors(&self, id: &MemoryId, level: usize) -> Option<&[MemoryId]> {
        self.nodes.get(id).map(|n| n.neighbors(level))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &IndexNode> {
        self.nodes.values()
    }

    /// Highest level currently present.
    pub fn max_level(&self) -> Option<usize> {
        self.entry_point
            .and_then(|ep| self.nodes.get(&ep))
            .map(|n| n.level)
    }

    /// Drop every node and forget the dimension.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.entry_point = None;
        self.dimension = None;
    }

    /// Check that `embedding` could be inserted: non-empty, finite and of the index dimension.
    pub fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(Error::InvalidEmbedding("embedding is empty".into()));
        }
        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(Error::dimension_mismatch(expected, embedding.len()));
            }
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidEmbedding("embedding contains non-finite values".into()));
        }
        Ok(())
    }

    fn random_level(&mut self) -> usize {
        let p = self.config.level_probability();
        let mut level = 0;
        while level < self.config.max_level && self.rng.gen::<f64>() < p {
            level += 1;
        }
        level
    }

    fn similarity_to(&self, query: &[f32], id: &MemoryId) -> f32 {
        self.nodes
            .get(id)
            .map(|n| cosine_similarity(query, &n.embedding))
            .unwrap_or(f32::MIN)
    }

    // ==================== Insert ====================

    /// Insert a vector. An existing id is replaced.
    pub fn add(
        &mut self,
        id: MemoryId,
        embedding: Vec<f32>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<()> {
        if let Err(e) = self.validate_embedding(&embedding) {
            warn!(%id, error = %e, "Rejected embedding");
            return Err(e);
        }
        if self.nodes.contains_key(&id) {
            self.remove(&id);
        }

        let level = self.random_level();
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut node = IndexNode {
            id,
            embedding,
            level,
            connections: vec![Vec::new(); level + 1],
            metadata,
            seq,
        };

        let Some(entry) = self.entry_point else {
            self.dimension = Some(node.embedding.len());
            self.nodes.insert(id, node);
            self.entry_point = Some(id);
            debug!(%id, level, "Inserted first node");
            return Ok(());
        };
        let entry_level = self.nodes.get(&entry).map(|n| n.level).unwrap_or(0);

        let mut current = entry;
        for lc in (level + 1..=entry_level).rev() {
            current = self.greedy_closest(&node.embedding, current, lc);
        }

        let m = self.config.max_connections;
        for lc in (0..=level.min(entry_level)).rev() {
            let found = self.search_layer(&node.embedding, &[current], self.config.ef_construction, lc);
            if let Some(best) = found.first() {
                current = best.id;
            }
            node.connections[lc] = found.iter().take(m).map(|c| c.id).collect();
        }

        let links: Vec<(usize, Vec<MemoryId>)> = node
            .connections
            .iter()
            .enumerate()
            .map(|(lc, ids)| (lc, ids.clone()))
            .collect();
        self.nodes.insert(id, node);

        for (lc, neighbors) in links {
            for neighbor in neighbors {
                if let Some(n) = self.nodes.get_mut(&neighbor) {
                    if let Some(list) = n.connections.get_mut(lc) {
                        if !list.contains(&id) {
                            list.push(id);
                        }
                    }
                }
                self.prune(&neighbor, lc);
            }
        }

        if level > entry_level {
            self.entry_point = Some(id);
        }
        debug!(%id, level, size = self.nodes.len(), "Inserted node");
        Ok(())
    }

    /// Trim a node's adjacency at `level` back to the closest `max_connections`.
    fn prune(&mut self, id: &MemoryId, level: usize) {
        let m = self.config.max_connections;
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let Some(list) = node.connections.get(level) else {
            return;
        };
        if list.len() <= m {
            return;
        }

        let mut scored: Vec<Candidate> = list
            .iter()
            .map(|n| Candidate {
                similarity: self.similarity_to(&node.embedding, n),
                id: *n,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        let kept: Vec<MemoryId> = scored.into_iter().take(m).map(|c| c.id).collect();

        if let Some(node) = self.nodes.get_mut(id) {
            node.connections[level] = kept;
        }
    }

    // ==================== Search ====================

    /// Move to the best neighbor at `level` until no neighbor improves on the current node.
    fn greedy_closest(&self, query: &[f32], start: MemoryId, level: usize) -> MemoryId {
        let mut current = start;
        let mut best = self.similarity_to(query, &current);
        loop {
            let Some(node) = self.nodes.get(&current) else {
                return current;
            };
            let next = node
                .neighbors(level)
                .iter()
                .filter(|n| self.nodes.contains_key(n))
                .map(|n| Candidate {
                    similarity: self.similarity_to(query, n),
                    id: *n,
                })
                .max();
            match next {
                Some(c) if c.similarity > best => {
                    current = c.id;
                    best = c.similarity;
                }
                _ => return current,
            }
        }
    }

    /// Beam search at one level. Returns up to `ef` candidates, best first.
    fn search_layer(&self, query: &[f32], entries: &[MemoryId], ef: usize, level: usize) -> Vec<Candidate> {
        let ef = ef.max(1);
        let mut visited: HashSet<MemoryId> = HashSet::new();
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        for id in entries {
            if !self.nodes.contains_key(id) || !visited.insert(*id) {
                continue;
            }
            let c = Candidate {
                similarity: self.similarity_to(query, id),
                id: *id,
            };
            frontier.push(c);
            results.push(Reverse(c));
        }

        while let Some(current) = frontier.pop() {
            let worst = results.peek().map(|r| r.0.similarity).unwrap_or(f32::MIN);
            if results.len() >= ef && current.similarity < worst {
                break;
            }

            let Some(node) = self.nodes.get(&current.id) else {
                continue;
            };
            for neighbor in node.neighbors(level) {
                if !visited.insert(*neighbor) || !self.nodes.contains_key(neighbor) {
                    continue;
                }
                let similarity = self.similarity_to(query, neighbor);
                let worst = results.peek().map(|r| r.0.similarity).unwrap_or(f32::MIN);
                if results.len() < ef || similarity > worst {
                    let c = Candidate {
                        similarity,
                        id: *neighbor,
                    };
                    frontier.push(c);
                    results.push(Reverse(c));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }

    /// Approximate top-`k` by cosine similarity, best first.
    ///
    /// An empty index yields an empty list; a query of the wrong dimension is
    /// rejected.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredId>> {
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension {
            if query.len() != expected {
                return Err(Error::dimension_mismatch(expected, query.len()));
            }
        }

        let top = self.nodes.get(&entry).map(|n| n.level).unwrap_or(0);
        let mut current = entry;
        for lc in (1..=top).rev() {
            current = self.greedy_closest(query, current, lc);
        }

        let ef = self.config.ef_search.max(k);
        Ok(self
            .search_layer(query, &[current], ef, 0)
            .into_iter()
            .take(k)
            .map(|c| ScoredId::new(c.id, c.similarity as f64))
            .collect())
    }

    /// Exhaustive top-`k`, for recall measurement and tiny indexes.
    pub fn brute_force(&self, query: &[f32], k: usize) -> Vec<ScoredId> {
        let mut all: Vec<Candidate> = self
            .nodes
            .values()
            .map(|n| Candidate {
                similarity: cosine_similarity(query, &n.embedding),
                id: n.id,
            })
            .collect();
        all.sort_by(|a, b| b.cmp(a));
        all.into_iter()
            .take(k)
            .map(|c| ScoredId::new(c.id, c.similarity as f64))
            .collect()
    }

    // ==================== Delete ====================

    /// Remove a node and every reference to it. Absent ids are a no-op.
    ///
    /// If the entry point is removed, the remaining node with the highest
    /// level (earliest inserted on ties) takes over. Level-0 connectivity is
    /// not repaired.
    pub fn remove(&mut self, id: &MemoryId) -> Option<IndexNode> {
        let removed = self.nodes.remove(id)?;

        for node in self.nodes.values_mut() {
            for list in node.connections.iter_mut() {
                list.retain(|n| n != id);
            }
        }

        if self.entry_point == Some(*id) {
            self.entry_point = self
                .nodes
                .values()
                .max_by(|a, b| a.level.cmp(&b.level).then(b.seq.cmp(&a.seq)))
                .map(|n| n.id);
            debug!(%id, new_entry = ?self.entry_point, "Replaced entry point");
        }
        Some(removed)
    }
}

impl Default for HnswIndex {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn seeded() -> HnswIndex {
        HnswIndex::new(IndexConfig::default().with_seed(42))
    }

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    fn assert_no_dangling(index: &HnswIndex) {
        for node in index.nodes() {
            assert_eq!(node.connections.len(), node.level + 1);
            for list in &node.connections {
                for n in list {
                    assert!(index.contains(n), "dangling neighbor {}", n);
                }
            }
        }
    }

    #[test]
    fn test_empty_search() {
        let index = seeded();
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_singleton_exact_match() {
        let mut index = seeded();
        let id = MemoryId::new();
        index.add(id, vec![0.1, 0.2, 0.3], None).unwrap();

        let results = index.search(&[0.1, 0.2, 0.3], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(index.entry_point(), Some(id));
    }

    #[test]
    fn test_exact_match_small_index() {
        let mut index = seeded();
        let vectors = random_vectors(30, 8, 7);
        let ids: Vec<MemoryId> = vectors
            .iter()
            .map(|v| {
                let id = MemoryId::new();
                index.add(id, v.clone(), None).unwrap();
                id
            })
            .collect();

        for (id, v) in ids.iter().zip(&vectors) {
            let top = index.search(v, 1).unwrap();
            assert_eq!(top[0].id, *id);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = seeded();
        index.add(MemoryId::new(), vec![1.0, 0.0, 0.0], None).unwrap();

        let err = index.add(MemoryId::new(), vec![1.0, 0.0], None).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));

        let err = index.search(&[1.0], 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_rejects_invalid_embeddings() {
        let mut index = seeded();
        assert!(matches!(
            index.add(MemoryId::new(), vec![], None),
            Err(Error::InvalidEmbedding(_))
        ));
        assert!(matches!(
            index.add(MemoryId::new(), vec![f32::NAN, 1.0], None),
            Err(Error::InvalidEmbedding(_))
        ));
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
    }

    #[test]
    fn test_connections_are_bounded() {
        let mut index = HnswIndex::new(IndexConfig::default().with_seed(1).with_max_connections(4));
        for v in random_vectors(100, 8, 3) {
            index.add(MemoryId::new(), v, None).unwrap();
        }
        for node in index.nodes() {
            for list in &node.connections {
                assert!(list.len() <= 4);
                assert!(!list.contains(&node.id));
            }
        }
        assert_no_dangling(&index);
    }

    #[test]
    fn test_delete_leaves_no_dangling_ids() {
        let mut index = seeded();
        let vectors = random_vectors(60, 8, 11);
        let ids: Vec<MemoryId> = vectors
            .iter()
            .map(|v| {
                let id = MemoryId::new();
                index.add(id, v.clone(), None).unwrap();
                id
            })
            .collect();

        let victim = ids[17];
        assert!(index.remove(&victim).is_some());
        assert!(index.remove(&victim).is_none());

        assert_no_dangling(&index);
        let results = index.search(&vectors[17], 60).unwrap();
        assert!(results.iter().all(|r| r.id != victim));
    }

    #[test]
    fn test_delete_entry_point_picks_highest_level() {
        let mut index = seeded();
        for v in random_vectors(50, 4, 5) {
            index.add(MemoryId::new(), v, None).unwrap();
        }
        let entry = index.entry_point().unwrap();
        index.remove(&entry);

        let new_entry = index.entry_point().unwrap();
        let top = index.nodes().map(|n| n.level).max().unwrap();
        assert_eq!(index.get(&new_entry).unwrap().level, top);
    }

    #[test]
    fn test_delete_last_node_empties_index() {
        let mut index = seeded();
        let id = MemoryId::new();
        index.add(id, vec![1.0, 1.0], None).unwrap();
        index.remove(&id);
        assert!(index.is_empty());
        assert_eq!(index.entry_point(), None);
        assert!(index.search(&[1.0, 1.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_readd_replaces() {
        let mut index = seeded();
        let id = MemoryId::new();
        index.add(id, vec![1.0, 0.0], None).unwrap();
        index.add(MemoryId::new(), vec![0.0, 1.0], None).unwrap();
        index.add(id, vec![0.0, 1.0], None).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.embedding(&id), Some(&[0.0, 1.0][..]));
    }

    #[test]
    fn test_recall_against_brute_force() {
        let mut index = seeded();
        for v in random_vectors(200, 16, 99) {
            index.add(MemoryId::new(), v, None).unwrap();
        }

        let k = 10;
        let queries = random_vectors(20, 16, 1234);
        let mut hits = 0;
        for q in &queries {
            let truth: HashSet<MemoryId> = index.brute_force(q, k).into_iter().map(|s| s.id).collect();
            let found = index.search(q, k).unwrap();
            assert_eq!(found.len(), k);
            hits += found.iter().filter(|s| truth.contains(&s.id)).count();
        }

        let recall = hits as f64 / (k * queries.len()) as f64;
        assert!(recall >= 0.9, "recall {} below 0.9", recall);
    }

    #[test]
    fn test_results_sorted_descending() {
        let mut index = seeded();
        for v in random_vectors(80, 6, 21) {
            index.add(MemoryId::new(), v, None).unwrap();
        }
        let results = index.search(&[0.5, -0.2, 0.1, 0.9, 0.0, 0.3], 15).unwrap();
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_seeded_levels_are_reproducible() {
        let build = || {
            let mut index = HnswIndex::new(IndexConfig::default().with_seed(7));
            (0..40).map(|_| index.random_level()).collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_level_probability_is_inverse_m() {
        let config = IndexConfig::default();
        assert!((config.level_probability() - 1.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_metadata_is_kept() {
        let mut index = seeded();
        let id = MemoryId::new();
        let mut meta = HashMap::new();
        meta.insert("tier".to_string(), Value::from("core"));
        index.add(id, vec![1.0], Some(meta)).unwrap();
        assert_eq!(
            index.get(&id).unwrap().metadata.as_ref().unwrap()["tier"],
            Value::from("core")
        );
    }

    #[test]
    fn test_clear_resets_dimension() {
        let mut index = seeded();
        index.add(MemoryId::new(), vec![1.0, 2.0], None).unwrap();
        index.clear();
        index.add(MemoryId::new(), vec![1.0, 2.0, 3.0], None).unwrap();
        assert_eq!(index.dimension(), Some(3));
    }
}
