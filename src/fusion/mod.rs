//! Rank fusion: merges ranked lists from independent retrieval sources.
//!
//! - [`RankFusionEngine::fuse_by_rank`]: weighted Reciprocal Rank Fusion
//! - [`RankFusionEngine::fuse_by_weighted_score`]: max-normalized score fusion
//! - [`diversify`]: Maximal Marginal Relevance reordering
//! - [`QueryExpander`]: query-side text transforms applied before lexical retrieval
//!
//! ## Example
//!
//! ```rust,ignore
//! use recall_core::fusion::{RankFusionEngine, RankedList, RetrievalSource};
//!
//! let engine = RankFusionEngine::default();
//! let fused = engine.fuse_by_rank(&[
//!     RankedList::new(RetrievalSource::Semantic, semantic_hits),
//!     RankedList::new(RetrievalSource::FullText, bm25_hits),
//! ]);
//! ```

mod expansion;
mod mmr;
mod proptest;
mod rrf;

pub use expansion::{tokenize, ExpandedQuery, QueryExpander};
pub use mmr::diversify;
pub use rrf::{
    FusionConfig, RankFusionEngine, RankedList, RetrievalSource, RrfResult, SourceRank,
    SourceWeights,
};
