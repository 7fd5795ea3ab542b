//! Query expansion: stop-word stripping, suffix stemming and synonyms.
//!
//! Pure text transforms with no external state. The lexical matcher uses the
//! same [`tokenize`] and [`QueryExpander::stem`] so that indexed terms and
//! query terms line up.

use std::collections::{HashMap, HashSet};

const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "did",
    "do", "does", "for", "from", "had", "has", "have", "he", "how", "i", "if", "in", "into", "is",
    "it", "its", "me", "my", "no", "not", "of", "on", "or", "our", "she", "should", "so", "than",
    "that", "the", "their", "then", "there", "these", "they", "this", "those", "to", "was", "we",
    "were", "what", "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

const DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    ("error", &["bug", "failure", "issue"]),
    ("fix", &["repair", "resolve"]),
    ("config", &["configuration", "settings"]),
    ("delete", &["remove"]),
    ("create", &["add", "make"]),
    ("start", &["begin", "launch"]),
    ("stop", &["halt", "end"]),
    ("fast", &["quick"]),
    ("big", &["large"]),
    ("small", &["little"]),
    ("user", &["customer"]),
    ("meeting", &["call"]),
];

/// Lowercased alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Result of expanding a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandedQuery {
    pub original: String,
    /// Tokens with stop words removed, de-duplicated
    pub terms: Vec<String>,
    /// Stems of `terms` that differ from the term
    pub stems: Vec<String>,
    /// Synonyms of `terms` and their stems
    pub synonyms: Vec<String>,
}

impl ExpandedQuery {
    /// Terms, stems and synonyms, de-duplicated in first-seen order.
    pub fn all_terms(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.terms
            .iter()
            .chain(&self.stems)
            .chain(&self.synonyms)
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Stop-word, stemming and synonym rules.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    stop_words: HashSet<String>,
    synonyms: HashMap<String, Vec<String>>,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
            synonyms: DEFAULT_SYNONYMS
                .iter()
                .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect(),
        }
    }
}

impl QueryExpander {
    const MIN_STEM: usize = 3;

    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a synonym entry.
    pub fn with_synonyms(mut self, word: impl Into<String>, synonyms: &[&str]) -> Self {
        self.synonyms.insert(
            word.into().to_lowercase(),
            synonyms.iter().map(|s| s.to_lowercase()).collect(),
        );
        self
    }

    pub fn with_stop_word(mut self, word: impl Into<String>) -> Self {
        self.stop_words.insert(word.into().to_lowercase());
        self
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    /// Tokenize and drop stop words.
    pub fn strip_stop_words(&self, text: &str) -> Vec<String> {
        tokenize(text)
            .into_iter()
            .filter(|w| !self.is_stop_word(w))
            .collect()
    }

    /// Trivial suffix stripping. Stems shorter than three characters are rejected.
    pub fn stem(word: &str) -> String {
        let word = word.to_lowercase();
        let candidate = if let Some(base) = word.strip_suffix("ies") {
            Some(format!("{}y", base))
        } else if let Some(base) = word.strip_suffix("ing") {
            Some(base.to_string())
        } else if let Some(base) = word.strip_suffix("ed") {
            Some(base.to_string())
        } else if let Some(base) = word.strip_suffix("es").filter(|b| {
            b.ends_with('s') || b.ends_with('x') || b.ends_with('z') || b.ends_with("ch") || b.ends_with("sh")
        }) {
            Some(base.to_string())
        } else if word.ends_with('s') && !word.ends_with("ss") {
            Some(word[..word.len() - 1].to_string())
        } else {
            word.strip_suffix("ly").map(str::to_string)
        };

        match candidate {
            Some(stem) if stem.chars().count() >= Self::MIN_STEM => stem,
            _ => word,
        }
    }

    pub fn synonyms(&self, word: &str) -> &[String] {
        self.synonyms.get(word).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Expand a query into terms, stems and synonyms.
    pub fn expand(&self, query: &str) -> ExpandedQuery {
        let mut seen = HashSet::new();
        let terms: Vec<String> = self
            .strip_stop_words(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let mut stems = Vec::new();
        for term in &terms {
            let stem = Self::stem(term);
            if seen.insert(stem.clone()) {
                stems.push(stem);
            }
        }

        let mut synonyms = Vec::new();
        for word in terms.iter().chain(&stems) {
            for syn in self.synonyms(word) {
                if seen.insert(syn.clone()) {
                    synonyms.push(syn.clone());
                }
            }
        }

        ExpandedQuery {
            original: query.to_string(),
            terms,
            stems,
            synonyms,
        }
    }
}
