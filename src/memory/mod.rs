//! Tiered memory store with importance decay and compression.
//!
//! Every record lives in exactly one tier:
//!
//! - **Core**: permanent, never auto-evicted
//! - **Working**: capacity-bounded active set; least recently accessed
//!   entries are demoted when it overflows
//! - **Archive**: cold storage; content is compressed until next access
//!
//! Importance is a time-decayed, access-boosted score in `[0, 1]` that
//! drives placement and the periodic tier sweep.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recall_core::memory::{NewMemory, MemoryType, MemorySource, StoreConfig, TieredMemoryStore, Tier};
//!
//! let mut store = TieredMemoryStore::new(StoreConfig::default());
//!
//! let memory = store.store(
//!     NewMemory::new("Deploys must go through staging", MemoryType::Procedural, MemorySource::User)
//!         .with_importance(0.9),
//! );
//! assert_eq!(memory.tier, Tier::Core);
//!
//! // Periodic maintenance
//! let report = store.run_tier_management();
//! ```

mod compression;
mod importance;
mod proptest;
mod store;
mod types;

pub use compression::{decompress, split_sentences, CompressedContent, CompressionOutcome, Compressor};
pub use importance::{
    access_boost, calculate_importance, decay_factor, default_importance_keywords,
    ImportanceEstimator, ImportanceState,
};
pub use store::{MemoryStats, StoreConfig, TierReport, TieredMemoryStore};
pub use types::{
    Memory, MemoryId, MemoryMetadata, MemorySource, MemoryType, NewMemory, ScoredId, Tier,
};
