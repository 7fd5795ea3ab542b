//! Property-based tests for the vector index.
//!
//! - Cosine similarity stays within [-1, 1] and is symmetric
//! - Graph invariants survive arbitrary insert/delete sequences
//! - Search never returns more than `k` results, best first
