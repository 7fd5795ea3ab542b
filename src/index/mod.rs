//! Vector index: an HNSW graph over cosine similarity.
//!
//! The index stores only `(id, embedding, metadata)`; memory records live in
//! the [`TieredMemoryStore`](crate::memory::TieredMemoryStore) and are joined
//! back by id.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recall_core::index::{HnswIndex, IndexConfig};
//! use recall_core::MemoryId;
//!
//! let mut index = HnswIndex::new(IndexConfig::default().with_seed(42));
//! let id = MemoryId::new();
//! index.add(id, vec![0.1, 0.9, 0.3], None)?;
//!
//! let hits = index.search(&[0.1, 0.9, 0.3], 5)?;
//! assert_eq!(hits[0].id, id);
//! ```

mod hnsw;
mod proptest;
mod similarity;

pub use hnsw::{HnswIndex, IndexConfig, IndexNode};
pub use similarity::{cosine_similarity, normalize};
