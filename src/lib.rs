//! # recall-core
//!
//! An embedded vector memory and retrieval engine for agent and LLM hosts.
//!
//! ## Core Components
//!
//! - **Index**: HNSW approximate nearest-neighbour graph over cosine similarity
//! - **Fusion**: Reciprocal Rank Fusion, weighted fusion, MMR and query expansion
//! - **Lexical**: BM25 full-text and keyword matching
//! - **Memory**: Tiered store (core / working / archive) with importance decay
//! - **Orchestrator**: Embeds, retrieves, fuses and tracks access in one call
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use recall_core::{EngineConfig, HashEmbedder, MemoryQuery, MemorySource, MemoryType, NewMemory, RetrievalOrchestrator};
//!
//! let engine = RetrievalOrchestrator::new(EngineConfig::default(), Arc::new(HashEmbedder::default()))?;
//! engine
//!     .store(NewMemory::new("Prefers dark mode", MemoryType::Semantic, MemorySource::User))
//!     .await?;
//!
//! for memory in engine.search(MemoryQuery::text("ui theme preference")).await? {
//!     println!("{:.4} [{}] {}", memory.score, memory.tier, memory.content);
//! }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod events;
pub mod fusion;
pub mod index;
pub mod lexical;
pub mod memory;
pub mod orchestrator;

// Re-exports for convenience
pub use config::{EngineConfig, SearchConfig};
pub use embedding::{EmbeddingProvider, HashEmbedder};
pub use error::{Error, Result};
pub use events::{EventBus, MemoryEvent, TierChangeReason};
pub use fusion::{
    ExpandedQuery, FusionConfig, QueryExpander, RankFusionEngine, RankedList, RetrievalSource,
    RrfResult, SourceRank, SourceWeights,
};
pub use index::{cosine_similarity, HnswIndex, IndexConfig, IndexNode};
pub use lexical::{Bm25Index, LexicalMatcher};
pub use memory::{
    Memory, MemoryId, MemoryMetadata, MemorySource, MemoryStats, MemoryType, NewMemory, ScoredId,
    StoreConfig, Tier, TierReport, TieredMemoryStore,
};
pub use orchestrator::{MemoryQuery, RetrievalOrchestrator, SearchFilters};
