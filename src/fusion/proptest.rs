//! Property-based tests for rank fusion.
//!
//! - Appearing in an extra source never lowers an id's fused score
//! - Fused output is sorted and free of duplicates
//! - MMR returns a duplicate-free subset bounded by the limit
