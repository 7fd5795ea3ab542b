//! Lossy, extractive compression for archived memories.
//!
//! Compression keeps the leading fraction of sentences as the body and
//! records a one-sentence summary plus a handful of key points. The original
//! text is retained alongside so the next access can restore it.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::importance::ImportanceEstimator;
use super::types::Memory;

static SENTENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]*").expect("invalid regex"));

/// Compression record attached to an archived memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedContent {
    pub original: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub compressed_at: DateTime<Utc>,
}

/// What happened when compression was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// Content was shortened and a record attached
    Compressed,
    /// Already compressed; nothing changed
    AlreadyCompressed,
    /// Content had no sentences to extract; left as-is
    Skipped,
}

/// Split text into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
        .collect()
}

/// Extractive compressor.
#[derive(Debug, Clone)]
pub struct Compressor {
    ratio: f64,
    max_key_points: usize,
    estimator: ImportanceEstimator,
}

impl Compressor {
    const FALLBACK_KEY_POINTS: usize = 3;

    pub fn new(ratio: f64, max_key_points: usize, keywords: &[String]) -> Self {
        Self {
            ratio: ratio.clamp(0.0, 1.0),
            max_key_points,
            estimator: ImportanceEstimator::new(keywords),
        }
    }

    /// Number of leading sentences kept out of `total`. Never below one.
    pub fn retained_count(&self, total: usize) -> usize {
        ((total as f64) * self.ratio).ceil().max(1.0) as usize
    }

    /// Build the compression record for `text` without touching any memory.
    ///
    /// Returns the retained body and the record, or `None` when the text has
    /// no sentences.
    pub fn extract(&self, text: &str, now: DateTime<Utc>) -> Option<(String, CompressedContent)> {
        let sentences = split_sentences(text);
        let first = sentences.first()?.clone();

        let keep = self.retained_count(sentences.len()).min(sentences.len());
        let body = sentences[..keep].join(" ");

        let mut key_points: Vec<String> = sentences
            .iter()
            .filter(|s| self.estimator.contains_keyword(s))
            .take(self.max_key_points)
            .cloned()
            .collect();
        if key_points.is_empty() {
            key_points = sentences
                .iter()
                .take(Self::FALLBACK_KEY_POINTS.min(self.max_key_points))
                .cloned()
                .collect();
        }

        Some((
            body,
            CompressedContent {
                original: text.to_string(),
                summary: first,
                key_points,
                compressed_at: now,
            },
        ))
    }

    /// Compress a memory in place. Idempotent.
    pub fn compress(&self, memory: &mut Memory, now: DateTime<Utc>) -> CompressionOutcome {
        if memory.is_compressed() {
            return CompressionOutcome::AlreadyCompressed;
        }

        match self.extract(&memory.content, now) {
            Some((body, record)) => {
                debug!(
                    id = %memory.id,
                    from = record.original.len(),
                    to = body.len(),
                    "Compressed memory"
                );
                memory.content = body;
                memory.compression = Some(record);
                CompressionOutcome::Compressed
            }
            None => {
                warn!(id = %memory.id, "Nothing to compress; keeping original content");
                CompressionOutcome::Skipped
            }
        }
    }
}

/// Restore the original content of a compressed memory.
///
/// Returns `true` if the memory was compressed.
pub fn decompress(memory: &mut Memory) -> bool {
    match memory.compression.take() {
        Some(record) => {
            memory.content = record.original;
            true
        }
        None => false,
    }
}
