//! Property-based tests for importance scoring and tier placement.
//!
//! - Computed importance always stays within [0, 1]
//! - It strictly decreases with elapsed time and increases with access count
//! - The working tier never exceeds its capacity

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    use crate::memory::{
        calculate_importance, MemorySource, MemoryType, NewMemory, StoreConfig, Tier,
        TieredMemoryStore,
    };

    fn base_score() -> impl Strategy<Value = f64> {
        0.01f64..0.5f64
    }

    // =========================================================================
    // Importance
    // =========================================================================

    proptest! {
        #[test]
        fn importance_is_clamped(
            base in -1.0f64..2.0f64,
            count in 0u64..10_000,
            days in 0.0f64..1_000.0,
            rate in 0.0f64..1.0,
        ) {
            let score = calculate_importance(base, count, days, rate);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        /// Older last access means lower importance.
        #[test]
        fn importance_decreases_with_time(
            base in base_score(),
            count in 0u64..20,
            days in 0.0f64..100.0,
            extra in 0.1f64..100.0,
            rate in 0.01f64..0.5,
        ) {
            let earlier = calculate_importance(base, count, days, rate);
            let later = calculate_importance(base, count, days + extra, rate);
            prop_assert!(later < earlier, "{} !< {}", later, earlier);
        }

        /// More accesses mean higher importance while below the clamp.
        #[test]
        fn importance_increases_with_access(
            base in base_score(),
            count in 0u64..20,
            days in 0.0f64..10.0,
        ) {
            let fewer = calculate_importance(base, count, days, 0.05);
            let more = calculate_importance(base, count + 1, days, 0.05);
            prop_assert!(more > fewer, "{} !> {}", more, fewer);
        }
    }

    // =========================================================================
    // Tier Placement
    // =========================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn working_tier_respects_capacity(
            capacity in 1usize..8,
            importances in prop::collection::vec(0.0f64..1.0, 0..30),
        ) {
            let mut store = TieredMemoryStore::new(StoreConfig {
                working_memory_capacity: capacity,
                ..Default::default()
            });
            let start = Utc::now();
            for (i, importance) in importances.iter().enumerate() {
                let input = NewMemory::new(format!("Memory {}.", i), MemoryType::Episodic, MemorySource::System)
                    .with_importance(*importance);
                store.store_at(input, start + Duration::seconds(i as i64));
                prop_assert!(store.tier_count(Tier::Working) <= capacity);
            }

            let cores = importances.iter().filter(|i| **i >= 0.8).count();
            prop_assert_eq!(store.tier_count(Tier::Core), cores);
            prop_assert_eq!(store.len(), importances.len());
            prop_assert_eq!(store.access_order().len(), importances.len());
        }
    }
}
