//! Embedding providers.
//!
//! The engine never computes embeddings itself; it calls an
//! [`EmbeddingProvider`]. [`HashEmbedder`] is a deterministic, offline
//! fallback based on feature hashing, useful for tests and for hosts without
//! a model.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recall_core::embedding::{EmbeddingProvider, HashEmbedder};
//!
//! let embedder = HashEmbedder::new(256);
//! let v = embedder.embed("deploy the service").await?;
//! assert_eq!(v.len(), 256);
//! ```

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::fusion::tokenize;
use crate::index::normalize;

/// Text-to-vector provider.
///
/// Implementations must return vectors of [`EmbeddingProvider::dimension`]
/// length, consistently across calls.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, used in error messages.
    fn name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, in order. Defaults to sequential [`EmbeddingProvider::embed`] calls.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Feature-hashing embedder.
///
/// Word tokens and character trigrams are hashed with SHA-256 into signed
/// buckets, then the vector is scaled to unit length. Texts sharing
/// vocabulary get positive cosine similarity; empty text maps to the zero
/// vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;
    const WORD_WEIGHT: f32 = 1.0;
    const TRIGRAM_WEIGHT: f32 = 0.5;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Compute the embedding synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];

        for token in tokenize(text) {
            self.add_feature(&mut vector, b"w:", token.as_bytes(), Self::WORD_WEIGHT);

            let padded: Vec<char> = format!(" {} ", token).chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, b"c:", trigram.as_bytes(), Self::TRIGRAM_WEIGHT);
            }
        }

        normalize(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f32], prefix: &[u8], feature: &[u8], weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(prefix);
        hasher.update(feature);
        let digest = hasher.finalize();

        let bucket = digest[..8].iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        let idx = (bucket % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign * weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Check a provider's output against its declared dimension.
pub(crate) fn check_dimension(provider: &dyn EmbeddingProvider, embedding: &[f32]) -> Result<()> {
    if embedding.len() != provider.dimension() {
        return Err(Error::provider(
            provider.name(),
            format!(
                "returned {} dimensions, declared {}",
                embedding.len(),
                provider.dimension()
            ),
        ));
    }
    Ok(())
}
