//! Retrieval orchestrator: the engine's public API.
//!
//! Composes the vector index, the lexical matcher and the tiered store
//! behind a single lock:
//!
//! 1. EMBED: obtain embeddings from the provider (the only suspending step)
//! 2. RETRIEVE: semantic, full-text and keyword candidates
//! 3. FUSE: Reciprocal Rank Fusion, then filters and optional MMR
//! 4. TOUCH: access bookkeeping on every returned memory
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use recall_core::{EngineConfig, HashEmbedder, MemoryQuery, NewMemory, RetrievalOrchestrator};
//! use recall_core::memory::{MemorySource, MemoryType};
//!
//! let engine = RetrievalOrchestrator::new(EngineConfig::default(), Arc::new(HashEmbedder::default()))?;
//! engine
//!     .store(NewMemory::new("The staging cluster runs k8s 1.29", MemoryType::Semantic, MemorySource::Document))
//!     .await?;
//!
//! let hits = engine.search(MemoryQuery::text("which kubernetes version on staging?").with_limit(3)).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::embedding::{check_dimension, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::events::{EventBus, MemoryEvent};
use crate::fusion::{QueryExpander, RankFusionEngine, RankedList, RetrievalSource};
use crate::index::HnswIndex;
use crate::lexical::{Bm25Index, LexicalMatcher};
use crate::memory::{
    Memory, MemoryId, MemorySource, MemoryStats, MemoryType, NewMemory, TierReport,
    TieredMemoryStore,
};

/// Filters applied to search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub source: Option<MemorySource>,
    pub session_id: Option<String>,
    /// Every listed tag must be present
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// Inclusive lower bound on `timestamp`
    pub after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `timestamp`
    pub before: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn matches(&self, memory: &Memory) -> bool {
        if self.memory_type.is_some_and(|t| t != memory.memory_type) {
            return false;
        }
        if self.source.is_some_and(|s| s != memory.source) {
            return false;
        }
        if let Some(session) = &self.session_id {
            if memory.session_id() != Some(session.as_str()) {
                return false;
            }
        }
        if !self.tags.iter().all(|t| memory.metadata.has_tag(t)) {
            return false;
        }
        if let Some(category) = &self.category {
            if memory.metadata.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if self.after.is_some_and(|after| memory.timestamp < after) {
            return false;
        }
        if self.before.is_some_and(|before| memory.timestamp >= before) {
            return false;
        }
        true
    }
}

/// A search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQuery {
    /// Query text. Without it, search lists filtered memories newest first.
    pub content: Option<String>,
    pub filters: SearchFilters,
    pub limit: Option<usize>,
    /// Minimum cosine similarity for semantic candidates
    pub threshold: Option<f64>,
}

impl MemoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.filters.memory_type = Some(memory_type);
        self
    }

    pub fn with_source(mut self, source: MemorySource) -> Self {
        self.filters.source = Some(source);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.filters.session_id = Some(session_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.filters.tags.push(tag.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.filters.category = Some(category.into());
        self
    }

    pub fn after(mut self, at: DateTime<Utc>) -> Self {
        self.filters.after = Some(at);
        self
    }

    pub fn before(mut self, at: DateTime<Utc>) -> Self {
        self.filters.before = Some(at);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Everything guarded by the engine lock.
struct EngineState {
    index: HnswIndex,
    lexical: Box<dyn LexicalMatcher>,
    store: TieredMemoryStore,
}

impl EngineState {
    /// Add a memory to the store and both indexes. The embedding must already be validated.
    fn insert(&mut self, mut input: NewMemory, embedding: Vec<f32>) -> Result<Memory> {
        input.embedding = Some(embedding.clone());
        let memory = self.store.store(input);

        self.index
            .add(memory.id, embedding, Some(index_metadata(&memory)))?;
        self.lexical.index(memory.id, memory.full_content())?;
        Ok(memory)
    }

    fn remove(&mut self, id: &MemoryId) -> bool {
        self.index.remove(id);
        self.lexical.remove(id);
        self.store.delete(id).is_some()
    }
}

fn index_metadata(memory: &Memory) -> HashMap<String, Value> {
    let mut meta = HashMap::new();
    meta.insert("type".to_string(), Value::from(memory.memory_type.to_string()));
    meta.insert("source".to_string(), Value::from(memory.source.to_string()));
    if let Some(session) = memory.session_id() {
        meta.insert("sessionId".to_string(), Value::from(session));
    }
    meta
}

/// Embedded vector memory and retrieval engine.
///
/// All graph and tier mutations happen under one lock, which is never held
/// across an `.await`.
pub struct RetrievalOrchestrator {
    config: EngineConfig,
    provider: Arc<dyn EmbeddingProvider>,
    fusion: RankFusionEngine,
    expander: QueryExpander,
    events: EventBus,
    state: Mutex<EngineState>,
}

impl RetrievalOrchestrator {
    /// Create an engine with the default BM25 lexical matcher.
    pub fn new(config: EngineConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::with_lexical(config, provider, Box::new(Bm25Index::default()))
    }

    /// Create an engine with a custom lexical matcher.
    pub fn with_lexical(
        config: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
        lexical: Box<dyn LexicalMatcher>,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventBus::default();
        let state = EngineState {
            index: HnswIndex::new(config.index.clone()),
            lexical,
            store: TieredMemoryStore::with_events(config.store.clone(), events.clone()),
        };
        info!(provider = provider.name(), dimension = provider.dimension(), "Created retrieval engine");

        Ok(Self {
            fusion: RankFusionEngine::new(config.fusion.clone()),
            expander: QueryExpander::default(),
            config,
            provider,
            events,
            state: Mutex::new(state),
        })
    }

    /// Current configuration. Store settings are read from the live store,
    /// which a restored snapshot replaces.
    pub fn config(&self) -> Result<EngineConfig> {
        self.with_state(|state| {
            let mut config = self.config.clone();
            config.store = state.store.config().clone();
            Ok(config)
        })
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Subscribe to memory lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.events.subscribe()
    }

    /// Execute a function with the engine state locked.
    fn with_state<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut EngineState) -> Result<T>,
    {
        let mut state = self
            .state
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock engine state: {}", e)))?;
        f(&mut state)
    }

    fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.config.search.embed_timeout_ms)
    }

    /// Caller-supplied embeddings must match the provider dimension.
    fn check_supplied(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.provider.dimension();
        if embedding.len() != expected {
            return Err(Error::dimension_mismatch(expected, embedding.len()));
        }
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let ms = self.config.search.embed_timeout_ms;
        let embedding = tokio::time::timeout(self.embed_timeout(), self.provider.embed(text))
            .await
            .map_err(|_| {
                warn!(provider = self.provider.name(), timeout_ms = ms, "Embedding timed out");
                Error::timeout(ms)
            })??;
        check_dimension(self.provider.as_ref(), &embedding)?;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let ms = self.config.search.embed_timeout_ms;
        let embeddings = tokio::time::timeout(self.embed_timeout(), self.provider.embed_batch(texts))
            .await
            .map_err(|_| {
                warn!(provider = self.provider.name(), timeout_ms = ms, "Batch embedding timed out");
                Error::timeout(ms)
            })??;

        if embeddings.len() != texts.len() {
            return Err(Error::provider(
                self.provider.name(),
                format!("returned {} embeddings for {} texts", embeddings.len(), texts.len()),
            ));
        }
        for embedding in &embeddings {
            check_dimension(self.provider.as_ref(), embedding)?;
        }
        Ok(embeddings)
    }

    // ==================== Store ====================

    /// Store a memory, embedding its content unless an embedding is supplied.
    #[instrument(skip(self, input), fields(len = input.content.len()))]
    pub async fn store(&self, mut input: NewMemory) -> Result<Memory> {
        let embedding = match input.embedding.take() {
            Some(embedding) => {
                self.check_supplied(&embedding)?;
                embedding
            }
            None => self.embed(&input.content).await?,
        };

        let memory = self.with_state(|state| {
            state.index.validate_embedding(&embedding)?;
            state.insert(input, embedding)
        })?;
        debug!(id = %memory.id, tier = %memory.tier, "Stored memory");
        Ok(memory)
    }

    /// Store several memories. Embeddings are requested in one batch.
    ///
    /// Every embedding is validated before anything is inserted, so a
    /// rejected item leaves the engine unchanged.
    #[instrument(skip(self, inputs), fields(count = inputs.len()))]
    pub async fn store_batch(&self, mut inputs: Vec<NewMemory>) -> Result<Vec<Memory>> {
        for embedding in inputs.iter().filter_map(|input| input.embedding.as_deref()) {
            self.check_supplied(embedding)?;
        }
        let missing: Vec<usize> = inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| input.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        let texts: Vec<String> = missing.iter().map(|i| inputs[*i].content.clone()).collect();
        let computed = self.embed_batch(&texts).await?;
        for (i, embedding) in missing.into_iter().zip(computed) {
            inputs[i].embedding = Some(embedding);
        }

        let embeddings: Vec<Vec<f32>> = inputs
            .iter_mut()
            .map(|input| input.embedding.take().unwrap_or_default())
            .collect();

        let memories = self.with_state(|state| {
            let expected = state
                .index
                .dimension()
                .or_else(|| embeddings.first().map(Vec::len));
            for embedding in &embeddings {
                state.index.validate_embedding(embedding)?;
                if let Some(expected) = expected {
                    if embedding.len() != expected {
                        return Err(Error::dimension_mismatch(expected, embedding.len()));
                    }
                }
            }

            inputs
                .into_iter()
                .zip(embeddings)
                .map(|(input, embedding)| state.insert(input, embedding))
                .collect::<Result<Vec<_>>>()
        })?;

        info!(count = memories.len(), "Stored memory batch");
        Ok(memories)
    }

    // ==================== Retrieve ====================

    /// Fetch a memory with access bookkeeping.
    pub fn retrieve(&self, id: &MemoryId) -> Result<Option<Memory>> {
        self.with_state(|state| Ok(state.store.retrieve(id)))
    }

    /// Record an access on a memory that must exist.
    pub fn touch(&self, id: &MemoryId) -> Result<Memory> {
        self.with_state(|state| {
            state
                .store
                .retrieve(id)
                .ok_or_else(|| Error::NotFound(format!("memory {}", id)))
        })
    }

    /// Ranked search.
    ///
    /// With query text: semantic, full-text and keyword candidates are fused
    /// by rank, filtered, optionally diversified and truncated. Without
    /// text: filtered memories, newest first. Every returned memory gets the
    /// same access bookkeeping as [`RetrievalOrchestrator::retrieve`].
    #[instrument(skip(self, query), fields(limit = ?query.limit))]
    pub async fn search(&self, query: MemoryQuery) -> Result<Vec<Memory>> {
        let limit = query.limit.unwrap_or(self.config.search.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let text = query
            .content
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let Some(text) = text else {
            return self.with_state(|state| Ok(list_recent(state, &query.filters, limit)));
        };

        let embedding = self.embed(text).await?;
        let expanded = self.expander.expand(text);
        let pool = limit.saturating_mul(self.config.search.candidate_multiplier);
        let use_keywords = self.config.search.use_keyword_source;

        let results = self.with_state(|state| {
            let mut semantic = state.index.search(&embedding, pool)?;
            if let Some(threshold) = query.threshold {
                semantic.retain(|hit| hit.score >= threshold);
            }
            let full_text = state.lexical.search_full_text(text, pool)?;
            let keyword = if use_keywords && !expanded.is_empty() {
                state.lexical.search_keywords(&expanded.all_terms(), pool)?
            } else {
                Vec::new()
            };
            debug!(
                semantic = semantic.len(),
                full_text = full_text.len(),
                keyword = keyword.len(),
                "Collected candidates"
            );

            let mut fused = self.fusion.fuse_by_rank(&[
                RankedList::new(RetrievalSource::Semantic, semantic),
                RankedList::new(RetrievalSource::FullText, full_text),
                RankedList::new(RetrievalSource::Keyword, keyword),
            ]);
            fused.retain(|r| {
                state
                    .store
                    .get(&r.id)
                    .is_some_and(|m| query.filters.matches(m))
            });

            let ranked = match self.config.search.mmr_lambda {
                Some(lambda) => {
                    let index = &state.index;
                    self.fusion
                        .diversify(&fused, |id| index.embedding(id), lambda, limit)
                }
                None => {
                    fused.truncate(limit);
                    fused
                }
            };

            for result in &ranked {
                state.store.set_score(&result.id, result.fused_score);
            }
            let ids: Vec<MemoryId> = ranked.iter().map(|r| r.id).collect();
            Ok(state.store.retrieve_many(&ids))
        })?;

        debug!(count = results.len(), "Search complete");
        Ok(results)
    }

    // ==================== Delete ====================

    /// Delete a memory. Returns whether it existed.
    pub fn delete(&self, id: &MemoryId) -> Result<bool> {
        self.with_state(|state| Ok(state.remove(id)))
    }

    /// Delete every memory of a session. Returns the count removed.
    pub fn delete_by_session(&self, session_id: &str) -> Result<usize> {
        self.with_state(|state| {
            let ids = state.store.delete_by_session(session_id);
            for id in &ids {
                state.index.remove(id);
                state.lexical.remove(id);
            }
            Ok(ids.len())
        })
    }

    /// Remove everything.
    pub fn clear(&self) -> Result<()> {
        self.with_state(|state| {
            state.store.clear();
            state.index.clear();
            state.lexical.clear();
            Ok(())
        })
    }

    // ==================== Maintenance ====================

    pub fn count(&self) -> Result<usize> {
        self.with_state(|state| Ok(state.store.len()))
    }

    pub fn get_stats(&self) -> Result<MemoryStats> {
        self.with_state(|state| Ok(state.store.stats()))
    }

    /// Rescore, promote and demote across tiers.
    pub fn run_tier_management(&self) -> Result<TierReport> {
        self.with_state(|state| Ok(state.store.run_tier_management()))
    }

    /// Remove expired memories from the store and both indexes.
    pub fn cleanup(&self) -> Result<usize> {
        self.with_state(|state| {
            let expired = state.store.cleanup_expired(Utc::now());
            for id in &expired {
                state.index.remove(id);
                state.lexical.remove(id);
            }
            if !expired.is_empty() {
                info!(count = expired.len(), "Removed expired memories");
            }
            Ok(expired.len())
        })
    }

    // ==================== Persistence ====================

    /// Serialize the store as JSON.
    pub fn snapshot_json(&self) -> Result<String> {
        self.with_state(|state| state.store.serialize())
    }

    /// Replace all state with a serialized snapshot.
    ///
    /// The store and vector index are rebuilt off to the side and swapped in
    /// only when both succeed.
    pub fn restore_json(&self, json: &str) -> Result<()> {
        let store = TieredMemoryStore::from_json(json, self.events.clone())?;

        let mut records: Vec<&Memory> = store.iter().collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let dimension = self.provider.dimension();
        let mut index = HnswIndex::new(self.config.index.clone());
        for memory in &records {
            if memory.embedding.is_empty() {
                continue;
            }
            if memory.embedding.len() != dimension {
                return Err(Error::invalid_state(format!(
                    "memory {} has {} dimensions, provider {} uses {}",
                    memory.id,
                    memory.embedding.len(),
                    self.provider.name(),
                    dimension
                )));
            }
            index
                .add(memory.id, memory.embedding.clone(), Some(index_metadata(memory)))
                .map_err(|e| Error::invalid_state(format!("memory {}: {}", memory.id, e)))?;
        }
        let texts: Vec<(MemoryId, String)> = records
            .iter()
            .map(|m| (m.id, m.full_content().to_string()))
            .collect();

        self.with_state(|state| {
            state.store = store;
            state.index = index;
            state.lexical.clear();
            for (id, text) in &texts {
                state.lexical.index(*id, text)?;
            }
            info!(count = state.store.len(), "Restored engine state");
            Ok(())
        })
    }

    /// Write a snapshot to `path`.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.snapshot_json()?;
        tokio::fs::write(path.as_ref(), json).await?;
        info!(path = %path.as_ref().display(), "Saved snapshot");
        Ok(())
    }

    /// Load a snapshot from `path`, replacing all state.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        self.restore_json(&json)
    }
}

/// Filtered memories, newest first, with access bookkeeping.
fn list_recent(state: &mut EngineState, filters: &SearchFilters, limit: usize) -> Vec<Memory> {
    let mut matching: Vec<(DateTime<Utc>, MemoryId)> = state
        .store
        .iter()
        .filter(|m| filters.matches(m))
        .map(|m| (m.timestamp, m.id))
        .collect();
    matching.sort_by(|a, b| b.cmp(a));

    let ids: Vec<MemoryId> = matching.into_iter().take(limit).map(|(_, id)| id).collect();
    state.store.retrieve_many(&ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::index::IndexConfig;
    use crate::memory::{StoreConfig, Tier};
    use crate::config::SearchConfig;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    fn config() -> EngineConfig {
        EngineConfig::default().with_index(IndexConfig::default().with_seed(42))
    }

    fn engine() -> RetrievalOrchestrator {
        engine_with(config())
    }

    fn engine_with(config: EngineConfig) -> RetrievalOrchestrator {
        RetrievalOrchestrator::new(config, Arc::new(HashEmbedder::new(64))).unwrap()
    }

    fn note(content: &str) -> NewMemory {
        NewMemory::new(content, MemoryType::Semantic, MemorySource::Conversation)
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn dimension(&self) -> usize {
            4
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![1.0; 4])
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            4
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::provider("failing", "model unavailable"))
        }
    }

    struct LyingProvider;

    #[async_trait]
    impl EmbeddingProvider for LyingProvider {
        fn name(&self) -> &str {
            "lying"
        }

        fn dimension(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; 3])
        }
    }

    #[tokio::test]
    async fn test_store_and_search() {
        let engine = engine();
        engine.store(note("The staging cluster runs kubernetes 1.29")).await.unwrap();
        engine.store(note("Lunch is at noon on Fridays")).await.unwrap();
        engine.store(note("Production kubernetes cluster was upgraded")).await.unwrap();

        let results = engine
            .search(MemoryQuery::text("kubernetes staging cluster").with_limit(2))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("staging"));
        assert!(results.iter().all(|m| !m.content.contains("Lunch")));
        assert!(results[0].score >= results[1].score);
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_search_updates_access_bookkeeping() {
        let engine = engine();
        let stored = engine
            .store(note("rust borrow checker rules").with_importance(0.5))
            .await
            .unwrap();

        engine.search(MemoryQuery::text("borrow checker")).await.unwrap();
        let memory = engine.retrieve(&stored.id).unwrap().unwrap();
        assert_eq!(memory.importance.access_count, 2);
        assert!(memory.score > 0.0);
    }

    #[tokio::test]
    async fn test_store_batch() {
        let engine = engine();
        let memories = engine
            .store_batch(vec![
                note("alpha service owns billing"),
                note("beta service owns search").with_embedding(HashEmbedder::new(64).embed_text("beta")),
                note("gamma service owns auth"),
            ])
            .await
            .unwrap();

        assert_eq!(memories.len(), 3);
        assert_eq!(engine.count().unwrap(), 3);
        let results = engine.search(MemoryQuery::text("billing")).await.unwrap();
        assert_eq!(results[0].id, memories[0].id);
    }

    #[tokio::test]
    async fn test_store_batch_rejects_all_on_bad_embedding() {
        let engine = engine();
        let err = engine
            .store_batch(vec![note("fine"), note("bad").with_embedding(vec![1.0; 3])])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DimensionMismatch { expected: 64, actual: 3 }));
        assert_eq!(engine.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_leaves_store_untouched() {
        let engine = engine();
        engine.store(note("first")).await.unwrap();

        let err = engine
            .store(note("wrong size").with_embedding(vec![0.5; 10]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 64, actual: 10 }));
        assert_eq!(engine.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filters() {
        let engine = engine();
        engine
            .store(note("deploy checklist for api").with_session("s1").with_tag("ops"))
            .await
            .unwrap();
        engine
            .store(
                NewMemory::new("deploy checklist for web", MemoryType::Procedural, MemorySource::Document)
                    .with_session("s2")
                    .with_tag("ops")
                    .with_category("runbook"),
            )
            .await
            .unwrap();

        let by_session = engine
            .search(MemoryQuery::text("deploy checklist").with_session("s1"))
            .await
            .unwrap();
        assert_eq!(by_session.len(), 1);
        assert!(by_session[0].content.contains("api"));

        let by_type = engine
            .search(MemoryQuery::text("deploy checklist").with_type(MemoryType::Procedural))
            .await
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].metadata.category.as_deref(), Some("runbook"));

        let by_tags = engine
            .search(MemoryQuery::text("deploy").with_tag("ops").with_tag("missing"))
            .await
            .unwrap();
        assert!(by_tags.is_empty());

        let future = engine
            .search(MemoryQuery::text("deploy").after(Utc::now() + ChronoDuration::hours(1)))
            .await
            .unwrap();
        assert!(future.is_empty());
    }

    #[tokio::test]
    async fn test_search_without_content_lists_newest_first() {
        let engine = engine();
        for content in ["oldest", "middle", "newest"] {
            engine.store(note(content)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let results = engine.search(MemoryQuery::new().with_limit(2)).await.unwrap();
        let contents: Vec<&str> = results.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["newest", "middle"]);
    }

    #[tokio::test]
    async fn test_threshold_filters_semantic_candidates() {
        let engine = engine();
        engine.store(note("quarterly revenue report")).await.unwrap();

        let results = engine
            .search(MemoryQuery::text("zebra migration patterns").with_threshold(0.99))
            .await
            .unwrap();
        assert!(results.is_empty());

        let results = engine
            .search(MemoryQuery::text("quarterly revenue report").with_threshold(0.99))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_delete_by_session() {
        let engine = engine();
        let a = engine.store(note("cache invalidation bug").with_session("s1")).await.unwrap();
        engine.store(note("cache warmup job").with_session("s1")).await.unwrap();
        engine.store(note("cache eviction policy").with_session("s2")).await.unwrap();

        assert!(engine.delete(&a.id).unwrap());
        assert!(!engine.delete(&a.id).unwrap());
        let results = engine.search(MemoryQuery::text("cache invalidation")).await.unwrap();
        assert!(results.iter().all(|m| m.id != a.id));

        assert_eq!(engine.delete_by_session("s1").unwrap(), 1);
        assert_eq!(engine.count().unwrap(), 1);
        let remaining = engine.search(MemoryQuery::text("cache")).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id(), Some("s2"));
    }

    #[tokio::test]
    async fn test_touch_reports_missing() {
        let engine = engine();
        let stored = engine.store(note("touch target").with_importance(0.5)).await.unwrap();

        let touched = engine.touch(&stored.id).unwrap();
        assert_eq!(touched.importance.access_count, 1);
        assert!(engine.retrieve(&MemoryId::new()).unwrap().is_none());
        assert!(matches!(engine.touch(&MemoryId::new()), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_clear() {
        let engine = engine();
        engine.store(note("something")).await.unwrap();
        engine.clear().unwrap();
        assert_eq!(engine.count().unwrap(), 0);
        assert!(engine.search(MemoryQuery::text("something")).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_timeout() {
        let config = EngineConfig::default()
            .with_search(SearchConfig::default().with_embed_timeout_ms(50));
        let engine = RetrievalOrchestrator::new(config, Arc::new(SlowProvider)).unwrap();

        let err = engine.store(note("never embedded")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { duration_ms: 50 }));
        assert_eq!(engine.count().unwrap(), 0);

        let err = engine.search(MemoryQuery::text("anything")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let engine = RetrievalOrchestrator::new(EngineConfig::default(), Arc::new(FailingProvider)).unwrap();
        let err = engine.store(note("x")).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));

        let engine = RetrievalOrchestrator::new(EngineConfig::default(), Arc::new(LyingProvider)).unwrap();
        let err = engine.store(note("x")).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert!(err.to_string().contains("lying"));
    }

    #[tokio::test]
    async fn test_archived_memory_found_and_promoted() {
        let store = StoreConfig {
            working_memory_capacity: 1,
            ..Default::default()
        };
        let engine = engine_with(config().with_store(store));
        let first = engine
            .store(
                note("Postgres replica lag alerts. Paging goes to the db team. Runbook in wiki.")
                    .with_importance(0.5),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        engine
            .store(note("Frontend bundle size budget").with_importance(0.5))
            .await
            .unwrap();

        let stats = engine.get_stats().unwrap();
        assert_eq!(stats.by_tier.get(&Tier::Archive), Some(&1));

        let results = engine.search(MemoryQuery::text("runbook wiki")).await.unwrap();
        assert_eq!(results[0].id, first.id);
        assert_eq!(results[0].tier, Tier::Working);
        assert!(results[0].content.contains("Runbook in wiki"));

        let stats = engine.get_stats().unwrap();
        assert_eq!(stats.by_tier.get(&Tier::Working), Some(&1));
        assert_eq!(stats.by_tier.get(&Tier::Archive), Some(&1));
    }

    #[tokio::test]
    async fn test_search_returns_records_as_stored() {
        let store = StoreConfig {
            working_memory_capacity: 1,
            ..Default::default()
        };
        let engine = engine_with(config().with_store(store));
        engine
            .store(
                note("Alpha runbook covers failover. Page the db team first. Then check replica lag.")
                    .with_importance(0.1),
            )
            .await
            .unwrap();
        engine
            .store(
                note("Beta runbook covers deploys. Page the web team first. Then check error budgets.")
                    .with_importance(0.1),
            )
            .await
            .unwrap();

        let results = engine
            .search(MemoryQuery::text("alpha runbook").with_limit(2))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tier, Tier::Working);
        assert!(!results[0].is_compressed());
        assert_eq!(results[1].tier, Tier::Archive);
        assert!(results[1].is_compressed());

        let snapshot: serde_json::Value =
            serde_json::from_str(&engine.snapshot_json().unwrap()).unwrap();
        for memory in &results {
            let stored = snapshot["memories"]
                .as_array()
                .unwrap()
                .iter()
                .find(|pair| pair[0] == memory.id.to_string())
                .unwrap();
            assert_eq!(stored[1]["tier"], memory.tier.to_string());
            assert_eq!(stored[1]["content"], memory.content);
        }
    }

    #[tokio::test]
    async fn test_mmr_diversifies() {
        let config = config().with_search(SearchConfig::default().with_mmr(0.3));
        let engine = engine_with(config);
        engine.store(note("redis cache timeout settings")).await.unwrap();
        engine.store(note("redis cache timeout settings")).await.unwrap();
        engine.store(note("redis cluster failover")).await.unwrap();

        let results = engine
            .search(MemoryQuery::text("redis cache timeout").with_limit(2))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|m| m.content.contains("failover")));
    }

    #[tokio::test]
    async fn test_cleanup_removes_from_indexes() {
        let engine = engine();
        engine
            .store(note("temporary token abc").with_expiry(Utc::now() - ChronoDuration::seconds(1)))
            .await
            .unwrap();
        engine.store(note("permanent token xyz")).await.unwrap();

        assert_eq!(engine.cleanup().unwrap(), 1);
        let results = engine.search(MemoryQuery::text("temporary token")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("permanent"));
    }

    #[tokio::test]
    async fn test_snapshot_save_and_load() {
        let original = engine();
        original.store(note("feature flags live in consul").with_importance(0.9)).await.unwrap();
        original.store(note("oncall rotation is weekly")).await.unwrap();
        original.store(note("legacy cron host decommissioned").with_importance(0.1)).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        original.save(&path).await.unwrap();

        let restored = engine();
        restored.load(&path).await.unwrap();

        assert_eq!(restored.count().unwrap(), 3);
        assert_eq!(restored.get_stats().unwrap().by_tier, original.get_stats().unwrap().by_tier);
        let results = restored.search(MemoryQuery::text("consul feature flags")).await.unwrap();
        assert!(results[0].content.contains("consul"));

        let results = restored.search(MemoryQuery::text("cron host")).await.unwrap();
        assert!(results.iter().any(|m| m.content.contains("decommissioned")));
    }

    #[tokio::test]
    async fn test_restore_rejects_foreign_dimension() {
        let small = RetrievalOrchestrator::new(config(), Arc::new(HashEmbedder::new(8))).unwrap();
        small.store(note("eight wide vectors")).await.unwrap();
        let snapshot = small.snapshot_json().unwrap();

        let engine = engine();
        engine.store(note("sixty four wide vectors")).await.unwrap();
        let err = engine.restore_json(&snapshot).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        assert_eq!(engine.count().unwrap(), 1);
        engine.store(note("still writable")).await.unwrap();
        assert!(!engine.search(MemoryQuery::text("writable")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_supplied_embedding_must_match_provider() {
        let engine = engine();
        let err = engine
            .store(note("first and foreign").with_embedding(vec![0.5; 8]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 64, actual: 8 }));

        let err = engine
            .store_batch(vec![note("foreign").with_embedding(vec![0.5; 8])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 64, actual: 8 }));
        assert_eq!(engine.count().unwrap(), 0);
        engine.store(note("native")).await.unwrap();
    }

    #[tokio::test]
    async fn test_config_follows_restored_store() {
        let store = StoreConfig {
            working_memory_capacity: 7,
            ..Default::default()
        };
        let original = engine_with(config().with_store(store));
        original.store(note("carried over")).await.unwrap();

        let restored = engine();
        assert_eq!(restored.config().unwrap().store.working_memory_capacity, 100);
        restored.restore_json(&original.snapshot_json().unwrap()).unwrap();
        assert_eq!(restored.config().unwrap().store.working_memory_capacity, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_store_search_delete() {
        let engine = Arc::new(engine());
        let mut doomed = Vec::new();
        for i in 0..10 {
            let memory = engine
                .store(note(&format!("shared topic doomed note {}", i)))
                .await
                .unwrap();
            doomed.push(memory.id);
        }

        let mut stores = Vec::new();
        for i in 0..20 {
            let engine = Arc::clone(&engine);
            stores.push(tokio::spawn(async move {
                engine
                    .store(note(&format!("shared topic kept note {}", i)))
                    .await
                    .map(|m| m.id)
            }));
        }
        let mut deletes = Vec::new();
        for id in doomed.clone() {
            let engine = Arc::clone(&engine);
            deletes.push(tokio::spawn(async move { engine.delete(&id) }));
        }
        let mut searches = Vec::new();
        for _ in 0..10 {
            let engine = Arc::clone(&engine);
            searches.push(tokio::spawn(async move {
                engine
                    .search(MemoryQuery::text("shared topic note").with_limit(50))
                    .await
            }));
        }

        let mut kept = Vec::new();
        for handle in stores {
            kept.push(handle.await.unwrap().unwrap());
        }
        for handle in deletes {
            assert!(handle.await.unwrap().unwrap());
        }
        for handle in searches {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(engine.count().unwrap(), kept.len());
        let results = engine
            .search(MemoryQuery::text("shared topic note").with_limit(100))
            .await
            .unwrap();
        assert!(results.iter().all(|m| !doomed.contains(&m.id)));
        assert_eq!(results.len(), kept.len());
        for id in &kept {
            assert!(engine.retrieve(id).unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_restore_malformed_keeps_state() {
        let engine = engine();
        engine.store(note("keep me")).await.unwrap();

        let err = engine.restore_json("{\"memories\": 5}").unwrap_err();
        assert!(err.is_serialization());
        assert_eq!(engine.count().unwrap(), 1);

        let err = engine.load("/no/such/snapshot.json").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(engine.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let engine = engine();
        let mut rx = engine.subscribe();
        let memory = engine.store(note("observe me").with_importance(0.5)).await.unwrap();
        engine.delete(&memory.id).unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            MemoryEvent::Stored {
                id: memory.id,
                tier: memory.tier
            }
        );
        assert_eq!(rx.recv().await.unwrap(), MemoryEvent::Deleted { id: memory.id });
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = config().with_search(SearchConfig {
            candidate_multiplier: 0,
            ..Default::default()
        });
        let result = RetrievalOrchestrator::new(config, Arc::new(HashEmbedder::default()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_filters_match() {
        let now = Utc::now();
        let mut store = TieredMemoryStore::default();
        let memory = store.store(
            note("x")
                .with_session("s")
                .with_tag("A")
                .with_category("c"),
        );

        assert!(SearchFilters::default().matches(&memory));
        let filters = SearchFilters {
            memory_type: Some(MemoryType::Semantic),
            source: Some(MemorySource::Conversation),
            session_id: Some("s".into()),
            tags: vec!["a".into()],
            category: Some("c".into()),
            after: Some(now - ChronoDuration::minutes(1)),
            before: Some(now + ChronoDuration::minutes(1)),
        };
        assert!(filters.matches(&memory));
        assert!(!SearchFilters {
            source: Some(MemorySource::User),
            ..Default::default()
        }
        .matches(&memory));
    }
}
