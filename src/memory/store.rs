//! In-memory tiered memory store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{EventBus, MemoryEvent, TierChangeReason};

use super::compression::{decompress, CompressionOutcome, Compressor};
use super::importance::{default_importance_keywords, ImportanceEstimator, ImportanceState};
use super::types::*;

/// Configuration for tier placement, decay and compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Maximum number of memories in the working tier
    pub working_memory_capacity: usize,
    /// Below this importance a memory lives in the archive
    pub archive_threshold: f64,
    /// At or above this importance a new memory goes to core
    pub core_threshold: f64,
    /// Archived memories scoring above this are promoted by the sweep
    pub promotion_threshold: f64,
    /// Importance decay per day since last access
    pub decay_rate: f64,
    /// Fraction of sentences kept when compressing
    pub compression_ratio: f64,
    /// Maximum key points recorded when compressing
    pub max_key_points: usize,
    /// Words that raise estimated importance and mark key points
    pub importance_keywords: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            working_memory_capacity: 100,
            archive_threshold: 0.3,
            core_threshold: 0.8,
            promotion_threshold: 0.6,
            decay_rate: 0.05,
            compression_ratio: 0.3,
            max_key_points: 5,
            importance_keywords: default_importance_keywords(),
        }
    }
}

impl StoreConfig {
    /// Check that thresholds and ratios are usable.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("archive_threshold", self.archive_threshold),
            ("core_threshold", self.core_threshold),
            ("promotion_threshold", self.promotion_threshold),
            ("compression_ratio", self.compression_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if self.archive_threshold > self.core_threshold {
            return Err(Error::Config(format!(
                "archive_threshold ({}) must not exceed core_threshold ({})",
                self.archive_threshold, self.core_threshold
            )));
        }
        if !self.decay_rate.is_finite() || self.decay_rate < 0.0 {
            return Err(Error::Config(format!(
                "decay_rate must be a non-negative number, got {}",
                self.decay_rate
            )));
        }
        Ok(())
    }

    /// Tier for a freshly stored memory of the given importance.
    pub fn initial_tier(&self, importance: f64) -> Tier {
        if importance >= self.core_threshold {
            Tier::Core
        } else if importance >= self.archive_threshold {
            Tier::Working
        } else {
            Tier::Archive
        }
    }
}

/// Outcome of a tier-management sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierReport {
    pub rescored: usize,
    pub promoted: Vec<MemoryId>,
    pub demoted: Vec<MemoryId>,
}

/// Statistics about the memory store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_count: usize,
    pub by_type: HashMap<MemoryType, usize>,
    pub by_source: HashMap<MemorySource, usize>,
    pub by_tier: HashMap<Tier, usize>,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
}

/// Persisted layout: `{memories: [[id, Memory]], accessQueue: [id], config}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    memories: Vec<(MemoryId, Memory)>,
    access_queue: Vec<MemoryId>,
    config: PersistedConfig,
}

/// [`StoreConfig`] as persisted: every field is required.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedConfig {
    working_memory_capacity: usize,
    archive_threshold: f64,
    core_threshold: f64,
    promotion_threshold: f64,
    decay_rate: f64,
    compression_ratio: f64,
    max_key_points: usize,
    importance_keywords: Vec<String>,
}

impl From<StoreConfig> for PersistedConfig {
    fn from(c: StoreConfig) -> Self {
        Self {
            working_memory_capacity: c.working_memory_capacity,
            archive_threshold: c.archive_threshold,
            core_threshold: c.core_threshold,
            promotion_threshold: c.promotion_threshold,
            decay_rate: c.decay_rate,
            compression_ratio: c.compression_ratio,
            max_key_points: c.max_key_points,
            importance_keywords: c.importance_keywords,
        }
    }
}

impl From<PersistedConfig> for StoreConfig {
    fn from(c: PersistedConfig) -> Self {
        Self {
            working_memory_capacity: c.working_memory_capacity,
            archive_threshold: c.archive_threshold,
            core_threshold: c.core_threshold,
            promotion_threshold: c.promotion_threshold,
            decay_rate: c.decay_rate,
            compression_ratio: c.compression_ratio,
            max_key_points: c.max_key_points,
            importance_keywords: c.importance_keywords,
        }
    }
}

/// Owner of canonical memory records and their tier placement.
///
/// Not internally synchronized: callers sharing a store across tasks wrap it
/// in a lock together with any index that mirrors it.
#[derive(Debug)]
pub struct TieredMemoryStore {
    config: StoreConfig,
    memories: HashMap<MemoryId, Memory>,
    /// Least recently accessed first
    access_queue: Vec<MemoryId>,
    estimator: ImportanceEstimator,
    compressor: Compressor,
    events: EventBus,
}

impl TieredMemoryStore {
    /// Create a store with the given configuration.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_events(config, EventBus::default())
    }

    /// Create a store publishing on an existing event bus.
    pub fn with_events(config: StoreConfig, events: EventBus) -> Self {
        let estimator = ImportanceEstimator::new(&config.importance_keywords);
        let compressor = Compressor::new(
            config.compression_ratio,
            config.max_key_points,
            &config.importance_keywords,
        );
        Self {
            config,
            memories: HashMap::new(),
            access_queue: Vec::new(),
            estimator,
            compressor,
            events,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.memories.contains_key(id)
    }

    /// Look at a memory without access bookkeeping.
    pub fn get(&self, id: &MemoryId) -> Option<&Memory> {
        self.memories.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Memory> {
        self.memories.values()
    }

    /// Ids in LRU order, least recently accessed first.
    pub fn access_order(&self) -> &[MemoryId] {
        &self.access_queue
    }

    pub fn tier_counts(&self) -> HashMap<Tier, usize> {
        let mut counts = HashMap::new();
        for memory in self.memories.values() {
            *counts.entry(memory.tier).or_insert(0) += 1;
        }
        counts
    }

    pub fn tier_count(&self, tier: Tier) -> usize {
        self.memories.values().filter(|m| m.tier == tier).count()
    }

    /// Estimate importance for content that has no explicit score.
    pub fn estimate_importance(&self, content: &str, metadata: &MemoryMetadata) -> f64 {
        self.estimator.estimate(content, metadata)
    }

    // ==================== Store / Retrieve ====================

    /// Store a new memory and place it in a tier.
    pub fn store(&mut self, input: NewMemory) -> Memory {
        self.store_at(input, Utc::now())
    }

    /// Store a new memory as of `now`.
    pub fn store_at(&mut self, input: NewMemory, now: DateTime<Utc>) -> Memory {
        let importance = input
            .importance
            .unwrap_or_else(|| self.estimator.estimate(&input.content, &input.metadata))
            .clamp(0.0, 1.0);
        let tier = self.config.initial_tier(importance);

        let mut memory = Memory {
            id: MemoryId::new(),
            content: input.content,
            embedding: input.embedding.unwrap_or_default(),
            memory_type: input.memory_type,
            source: input.source,
            metadata: input.metadata,
            timestamp: now,
            score: 0.0,
            tier,
            importance: ImportanceState::new(importance, self.config.decay_rate, now),
            compression: None,
            expires_at: input.expires_at,
        };
        let id = memory.id;

        if tier == Tier::Archive && self.compressor.compress(&mut memory, now) == CompressionOutcome::Compressed {
            self.events.publish(MemoryEvent::Compressed { id });
        }

        debug!(%id, %tier, importance, "Stored memory");
        self.memories.insert(id, memory);
        self.touch(id);
        self.events.publish(MemoryEvent::Stored { id, tier });

        if tier == Tier::Working {
            self.enforce_working_memory_capacity_at(now, &HashSet::new());
        }

        self.memories[&id].clone()
    }

    /// Retrieve a memory with access bookkeeping.
    pub fn retrieve(&mut self, id: &MemoryId) -> Option<Memory> {
        self.retrieve_at(id, Utc::now())
    }

    /// Retrieve as of `now`.
    ///
    /// Counts the access and refreshes importance (core memories keep their
    /// importance untouched), then promotes archived memories to working and
    /// restores their content.
    pub fn retrieve_at(&mut self, id: &MemoryId, now: DateTime<Utc>) -> Option<Memory> {
        self.retrieve_many_at(std::slice::from_ref(id), now).pop()
    }

    /// Retrieve several memories as a single access.
    pub fn retrieve_many(&mut self, ids: &[MemoryId]) -> Vec<Memory> {
        self.retrieve_many_at(ids, Utc::now())
    }

    /// Retrieve several memories as of `now`, in the order given.
    ///
    /// Access bookkeeping and promotion run for every hit, from the last id
    /// to the first so earlier ids count as more recently accessed. Working
    /// capacity is then enforced once, demoting other memories before any of
    /// `ids`. The returned records reflect the store after enforcement.
    /// Absent and repeated ids are skipped.
    pub fn retrieve_many_at(&mut self, ids: &[MemoryId], now: DateTime<Utc>) -> Vec<Memory> {
        let mut seen = HashSet::with_capacity(ids.len());
        let hits: Vec<MemoryId> = ids
            .iter()
            .filter(|id| self.memories.contains_key(*id) && seen.insert(**id))
            .copied()
            .collect();

        let mut promoted = false;
        for id in hits.iter().rev() {
            let Some(memory) = self.memories.get_mut(id) else {
                continue;
            };
            let tier = memory.tier;
            if tier != Tier::Core {
                memory.importance.record_access(now);
            }
            self.touch(*id);
            if tier == Tier::Archive {
                promoted |= self.promote(id, TierChangeReason::Access);
            }
        }

        if promoted {
            self.enforce_working_memory_capacity_at(now, &seen);
        }

        hits.iter()
            .filter_map(|id| {
                let memory = self.memories.get(id)?;
                self.events.publish(MemoryEvent::Retrieved { id: *id, tier: memory.tier });
                Some(memory.clone())
            })
            .collect()
    }

    /// Record the relevance score of the search that returned `id`.
    pub fn set_score(&mut self, id: &MemoryId, score: f64) -> bool {
        match self.memories.get_mut(id) {
            Some(memory) => {
                memory.score = score;
                true
            }
            None => false,
        }
    }

    /// Current importance of a memory, computed without mutating it.
    pub fn calculate_importance(&self, memory: &Memory, now: DateTime<Utc>) -> f64 {
        memory.importance.compute(now)
    }

    /// Move `id` to the most-recent end of the LRU queue.
    fn touch(&mut self, id: MemoryId) {
        self.access_queue.retain(|q| *q != id);
        self.access_queue.push(id);
    }

    // ==================== Tier Operations ====================

    /// Demote least-recently-accessed working memories until the working tier fits.
    ///
    /// Returns the demoted ids, oldest first.
    pub fn enforce_working_memory_capacity(&mut self) -> Vec<MemoryId> {
        self.enforce_working_memory_capacity_at(Utc::now(), &HashSet::new())
    }

    /// Demote the excess, taking unprotected memories first.
    fn enforce_working_memory_capacity_at(
        &mut self,
        now: DateTime<Utc>,
        protected: &HashSet<MemoryId>,
    ) -> Vec<MemoryId> {
        let capacity = self.config.working_memory_capacity;
        let positions: HashMap<MemoryId, usize> = self
            .access_queue
            .iter()
            .enumerate()
            .map(|(pos, id)| (*id, pos))
            .collect();

        let mut working: Vec<(bool, DateTime<Utc>, usize, MemoryId)> = self
            .memories
            .values()
            .filter(|m| m.tier == Tier::Working)
            .map(|m| {
                let pos = positions.get(&m.id).copied().unwrap_or(0);
                (protected.contains(&m.id), m.importance.last_accessed_at, pos, m.id)
            })
            .collect();

        if working.len() <= capacity {
            return Vec::new();
        }

        working.sort();
        let excess = working.len() - capacity;
        let demoted: Vec<MemoryId> = working.into_iter().take(excess).map(|(_, _, _, id)| id).collect();
        for id in &demoted {
            self.demote(id, TierChangeReason::Capacity, now);
        }

        debug!(count = demoted.len(), capacity, "Enforced working memory capacity");
        demoted
    }

    fn promote(&mut self, id: &MemoryId, reason: TierChangeReason) -> bool {
        let Some(memory) = self.memories.get_mut(id) else {
            return false;
        };
        if memory.tier != Tier::Archive {
            return false;
        }
        let from = memory.tier;
        memory.tier = Tier::Working;
        decompress(memory);

        debug!(%id, %reason, "Promoted memory to working");
        self.events.publish(MemoryEvent::Promoted {
            id: *id,
            from,
            to: Tier::Working,
            reason,
        });
        true
    }

    fn demote(&mut self, id: &MemoryId, reason: TierChangeReason, now: DateTime<Utc>) -> bool {
        let Some(memory) = self.memories.get_mut(id) else {
            return false;
        };
        if memory.tier != Tier::Working {
            return false;
        }
        let from = memory.tier;
        memory.tier = Tier::Archive;
        let outcome = self.compressor.compress(memory, now);

        debug!(%id, %reason, "Demoted memory to archive");
        self.events.publish(MemoryEvent::Demoted {
            id: *id,
            from,
            to: Tier::Archive,
            reason,
        });
        if outcome == CompressionOutcome::Compressed {
            self.events.publish(MemoryEvent::Compressed { id: *id });
        }
        true
    }

    /// Periodic sweep: rescore everything, promote hot archive entries,
    /// demote cold working entries, then re-enforce capacity.
    pub fn run_tier_management(&mut self) -> TierReport {
        self.run_tier_management_at(Utc::now())
    }

    pub fn run_tier_management_at(&mut self, now: DateTime<Utc>) -> TierReport {
        let mut report = TierReport::default();
        let mut to_promote = Vec::new();
        let mut to_demote = Vec::new();

        for memory in self.memories.values_mut() {
            let score = memory.importance.refresh(now);
            report.rescored += 1;
            match memory.tier {
                Tier::Archive if score > self.config.promotion_threshold => to_promote.push(memory.id),
                Tier::Working if score < self.config.archive_threshold => to_demote.push(memory.id),
                _ => {}
            }
        }

        for id in to_promote {
            if self.promote(&id, TierChangeReason::Importance) {
                report.promoted.push(id);
            }
        }
        let just_promoted: HashSet<MemoryId> = report.promoted.iter().copied().collect();
        for id in to_demote {
            if self.demote(&id, TierChangeReason::Decay, now) {
                report.demoted.push(id);
            }
        }
        report
            .demoted
            .extend(self.enforce_working_memory_capacity_at(now, &just_promoted));

        info!(
            rescored = report.rescored,
            promoted = report.promoted.len(),
            demoted = report.demoted.len(),
            "Tier management sweep complete"
        );
        report
    }

    /// Compress a memory's content regardless of tier.
    pub fn compress(&mut self, id: &MemoryId) -> Option<CompressionOutcome> {
        let memory = self.memories.get_mut(id)?;
        let outcome = self.compressor.compress(memory, Utc::now());
        if outcome == CompressionOutcome::Compressed {
            self.events.publish(MemoryEvent::Compressed { id: *id });
        }
        Some(outcome)
    }

    /// Restore a memory's original content. Returns `false` if it was not compressed.
    pub fn decompress(&mut self, id: &MemoryId) -> bool {
        self.memories.get_mut(id).map(decompress).unwrap_or(false)
    }

    // ==================== Removal ====================

    /// Delete a memory. Absent ids are a no-op.
    pub fn delete(&mut self, id: &MemoryId) -> Option<Memory> {
        let removed = self.memories.remove(id)?;
        self.access_queue.retain(|q| q != id);
        self.events.publish(MemoryEvent::Deleted { id: *id });
        Some(removed)
    }

    /// Delete every memory of a session. Returns the removed ids.
    pub fn delete_by_session(&mut self, session_id: &str) -> Vec<MemoryId> {
        let ids: Vec<MemoryId> = self
            .memories
            .values()
            .filter(|m| m.session_id() == Some(session_id))
            .map(|m| m.id)
            .collect();
        for id in &ids {
            self.delete(id);
        }
        ids
    }

    /// Remove memories whose explicit expiry has passed. Returns the count removed.
    pub fn cleanup(&mut self) -> usize {
        self.cleanup_expired(Utc::now()).len()
    }

    /// Remove memories expired as of `now`. Returns the removed ids.
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> Vec<MemoryId> {
        let expired: Vec<MemoryId> = self
            .memories
            .values()
            .filter(|m| m.is_expired(now))
            .map(|m| m.id)
            .collect();

        for id in &expired {
            self.memories.remove(id);
        }
        if !expired.is_empty() {
            let gone: HashSet<&MemoryId> = expired.iter().collect();
            self.access_queue.retain(|id| !gone.contains(id));
            self.events.publish(MemoryEvent::Expired { count: expired.len() });
        }
        expired
    }

    /// Remove everything and reset LRU bookkeeping.
    pub fn clear(&mut self) {
        self.memories.clear();
        self.access_queue.clear();
        self.events.publish(MemoryEvent::Cleared);
    }

    // ==================== Stats ====================

    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            total_count: self.memories.len(),
            ..Default::default()
        };
        for memory in self.memories.values() {
            *stats.by_type.entry(memory.memory_type).or_insert(0) += 1;
            *stats.by_source.entry(memory.source).or_insert(0) += 1;
            *stats.by_tier.entry(memory.tier).or_insert(0) += 1;
            stats.oldest_timestamp = Some(match stats.oldest_timestamp {
                Some(t) => t.min(memory.timestamp),
                None => memory.timestamp,
            });
            stats.newest_timestamp = Some(match stats.newest_timestamp {
                Some(t) => t.max(memory.timestamp),
                None => memory.timestamp,
            });
        }
        stats
    }

    // ==================== Persistence ====================

    /// Serialize records, LRU order and configuration to JSON.
    pub fn serialize(&self) -> Result<String> {
        let mut memories: Vec<(MemoryId, Memory)> = self
            .memories
            .iter()
            .map(|(id, m)| (*id, m.clone()))
            .collect();
        memories.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));

        let state = PersistedState {
            memories,
            access_queue: self.access_queue.clone(),
            config: self.config.clone().into(),
        };
        Ok(serde_json::to_string(&state)?)
    }

    /// Replace this store's contents with a serialized snapshot.
    ///
    /// The snapshot is fully parsed and validated before anything is
    /// replaced; on error the store is unchanged.
    pub fn deserialize(&mut self, json: &str) -> Result<()> {
        let restored = Self::from_json(json, self.events.clone())?;
        *self = restored;
        Ok(())
    }

    /// Build a store from a serialized snapshot.
    pub fn from_json(json: &str, events: EventBus) -> Result<Self> {
        let state: PersistedState = serde_json::from_str(json)?;
        let config = StoreConfig::from(state.config);
        config
            .validate()
            .map_err(|e| Error::invalid_state(format!("config: {}", e)))?;

        let mut memories = HashMap::with_capacity(state.memories.len());
        for (key, memory) in state.memories {
            if key != memory.id {
                return Err(Error::invalid_state(format!(
                    "record key {} does not match memory id {}",
                    key, memory.id
                )));
            }
            if memories.insert(key, memory).is_some() {
                return Err(Error::invalid_state(format!("duplicate memory id {}", key)));
            }
        }

        let mut seen = HashSet::with_capacity(state.access_queue.len());
        for id in &state.access_queue {
            if !memories.contains_key(id) {
                return Err(Error::invalid_state(format!("access queue references unknown id {}", id)));
            }
            if !seen.insert(*id) {
                return Err(Error::invalid_state(format!("access queue repeats id {}", id)));
            }
        }

        // Records missing from the queue count as least recently used.
        let mut missing: Vec<&Memory> = memories.values().filter(|m| !seen.contains(&m.id)).collect();
        missing.sort_by(|a, b| {
            a.importance
                .last_accessed_at
                .cmp(&b.importance.last_accessed_at)
                .then(a.id.cmp(&b.id))
        });
        let mut access_queue: Vec<MemoryId> = missing.iter().map(|m| m.id).collect();
        access_queue.extend(state.access_queue);

        let now = Utc::now();
        for memory in memories.values_mut() {
            memory.importance.refresh(now);
        }

        let mut store = Self::with_events(config, events);
        store.memories = memories;
        store.access_queue = access_queue;
        info!(count = store.memories.len(), "Restored memory store from snapshot");
        Ok(store)
    }
}

impl Default for TieredMemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
