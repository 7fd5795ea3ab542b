//! Lexical retrieval sources.
//!
//! [`LexicalMatcher`] is the seam for any component that answers a text
//! query with `(id, score)` pairs. [`Bm25Index`] is the default in-memory
//! implementation: an inverted index over stop-word-stripped, stemmed
//! tokens, scored with BM25 for full-text queries and by term coverage for
//! keyword queries.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::fusion::{tokenize, QueryExpander};
use crate::memory::{MemoryId, ScoredId};

/// A full-text / keyword matcher used as a fusion source.
pub trait LexicalMatcher: Send + Sync {
    /// Name of the matcher, used in provider errors.
    fn name(&self) -> &str;

    /// Index (or re-index) a document.
    fn index(&mut self, id: MemoryId, text: &str) -> Result<()>;

    /// Remove a document. Absent ids are a no-op.
    fn remove(&mut self, id: &MemoryId);

    fn clear(&mut self);

    /// Rank documents against a free-text query, best first.
    fn search_full_text(&self, query: &str, limit: usize) -> Result<Vec<ScoredId>>;

    /// Rank documents by how many of the given terms they contain, best first.
    fn search_keywords(&self, terms: &[String], limit: usize) -> Result<Vec<ScoredId>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
struct Document {
    term_freqs: HashMap<String, u32>,
    length: usize,
}

/// In-memory BM25 inverted index.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    k1: f64,
    b: f64,
    expander: QueryExpander,
    docs: HashMap<MemoryId, Document>,
    postings: HashMap<String, HashSet<MemoryId>>,
    total_length: usize,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new(QueryExpander::default())
    }
}

impl Bm25Index {
    pub const DEFAULT_K1: f64 = 1.2;
    pub const DEFAULT_B: f64 = 0.75;

    pub fn new(expander: QueryExpander) -> Self {
        Self {
            k1: Self::DEFAULT_K1,
            b: Self::DEFAULT_B,
            expander,
            docs: HashMap::new(),
            postings: HashMap::new(),
            total_length: 0,
        }
    }

    pub fn with_params(mut self, k1: f64, b: f64) -> Self {
        self.k1 = k1;
        self.b = b;
        self
    }

    /// Tokens as indexed: lowercased, stop words dropped, stemmed.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        tokenize(text)
            .into_iter()
            .filter(|t| !self.expander.is_stop_word(t))
            .map(|t| QueryExpander::stem(&t))
            .collect()
    }

    fn average_length(&self) -> f64 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.docs.len() as f64
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.postings.get(term).map(|p| p.len()).unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn rank(scores: HashMap<MemoryId, f64>, limit: usize) -> Vec<ScoredId> {
        let mut ranked: Vec<ScoredId> = scores
            .into_iter()
            .filter(|(_, s)| *s > 0.0)
            .map(|(id, s)| ScoredId::new(id, s))
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        ranked.truncate(limit);
        ranked
    }
}

impl LexicalMatcher for Bm25Index {
    fn name(&self) -> &str {
        "bm25"
    }

    fn index(&mut self, id: MemoryId, text: &str) -> Result<()> {
        self.remove(&id);

        let tokens = self.analyze(text);
        let mut doc = Document {
            length: tokens.len(),
            ..Default::default()
        };
        for token in tokens {
            *doc.term_freqs.entry(token).or_insert(0) += 1;
        }
        for term in doc.term_freqs.keys() {
            self.postings.entry(term.clone()).or_default().insert(id);
        }
        self.total_length += doc.length;
        self.docs.insert(id, doc);
        Ok(())
    }

    fn remove(&mut self, id: &MemoryId) {
        let Some(doc) = self.docs.remove(id) else {
            return;
        };
        self.total_length = self.total_length.saturating_sub(doc.length);
        for term in doc.term_freqs.keys() {
            if let Some(posting) = self.postings.get_mut(term) {
                posting.remove(id);
                if posting.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.docs.clear();
        self.postings.clear();
        self.total_length = 0;
    }

    fn search_full_text(&self, query: &str, limit: usize) -> Result<Vec<ScoredId>> {
        let terms: HashSet<String> = self.analyze(query).into_iter().collect();
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let avgdl = self.average_length().max(1.0);
        let mut scores: HashMap<MemoryId, f64> = HashMap::new();
        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(term);
            for id in posting {
                let Some(doc) = self.docs.get(id) else {
                    continue;
                };
                let tf = doc.term_freqs.get(term).copied().unwrap_or(0) as f64;
                let norm = 1.0 - self.b + self.b * doc.length as f64 / avgdl;
                *scores.entry(*id).or_insert(0.0) += idf * tf * (self.k1 + 1.0) / (tf + self.k1 * norm);
            }
        }

        Ok(Self::rank(scores, limit))
    }

    fn search_keywords(&self, terms: &[String], limit: usize) -> Result<Vec<ScoredId>> {
        let wanted: HashSet<String> = terms
            .iter()
            .flat_map(|t| self.analyze(t))
            .collect();
        if wanted.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits: HashMap<MemoryId, f64> = HashMap::new();
        for term in &wanted {
            if let Some(posting) = self.postings.get(term) {
                for id in posting {
                    *hits.entry(*id).or_insert(0.0) += 1.0;
                }
            }
        }
        let total = wanted.len() as f64;
        for score in hits.values_mut() {
            *score /= total;
        }

        Ok(Self::rank(hits, limit))
    }

    fn len(&self) -> usize {
        self.docs.len()
    }
}
