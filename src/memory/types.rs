//! Core types for the tiered memory store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::compression::CompressedContent;
use super::importance::ImportanceState;

/// Unique identifier for a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Generate a new random memory ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An id paired with a source-specific score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: MemoryId,
    pub score: f64,
}

impl ScoredId {
    pub fn new(id: MemoryId, score: f64) -> Self {
        Self { id, score }
    }
}

/// Kind of knowledge a memory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Events and conversation turns
    Episodic,
    /// Facts and extracted knowledge
    Semantic,
    /// Learned patterns and how-tos
    Procedural,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Episodic => write!(f, "episodic"),
            Self::Semantic => write!(f, "semantic"),
            Self::Procedural => write!(f, "procedural"),
        }
    }
}

/// Where a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Conversation,
    Document,
    System,
    User,
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Document => write!(f, "document"),
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Storage tier of a memory.
///
/// - **Core**: permanent, never auto-evicted
/// - **Working**: capacity-bounded active set (LRU demotion)
/// - **Archive**: cold storage, content compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Archive,
    Working,
    Core,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Working => write!(f, "working"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

/// Free-form metadata with a few well-known keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Any other caller-defined keys
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Case-insensitive tag check.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// A stored memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: MemoryId,
    /// Current body. Shortened while the memory is compressed.
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub source: MemorySource,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    pub timestamp: DateTime<Utc>,
    /// Relevance score of the last search that returned this memory
    #[serde(default)]
    pub score: f64,
    pub tier: Tier,
    pub importance: ImportanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressedContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Whether the content is currently compressed.
    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    /// The uncompressed text, regardless of compression state.
    pub fn full_content(&self) -> &str {
        match &self.compression {
            Some(c) => &c.original,
            None => &self.content,
        }
    }

    /// Whether an explicit expiry has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.metadata.session_id.as_deref()
    }
}

/// Input for storing a new memory.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub content: String,
    pub memory_type: MemoryType,
    pub source: MemorySource,
    pub metadata: MemoryMetadata,
    /// Explicit importance; estimated from content and metadata when absent
    pub importance: Option<f64>,
    /// Pre-computed embedding; the orchestrator embeds the content when absent
    pub embedding: Option<Vec<f32>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>, memory_type: MemoryType, source: MemorySource) -> Self {
        Self {
            content: content.into(),
            memory_type,
            source,
            metadata: MemoryMetadata::default(),
            importance: None,
            embedding: None,
            expires_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = Some(category.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.metadata.session_id = Some(session_id.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_id_roundtrip() {
        let id = MemoryId::new();
        let parsed = MemoryId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Core > Tier::Working);
        assert!(Tier::Working > Tier::Archive);
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let meta = MemoryMetadata::new()
            .with_tag("Important")
            .with_session("s-1")
            .with_value("channel", "slack");

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["channel"], "slack");
        assert!(meta.has_tag("important"));

        let back: MemoryMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_new_memory_builder() {
        let input = NewMemory::new("hello", MemoryType::Semantic, MemorySource::User)
            .with_tag("a")
            .with_category("critical")
            .with_importance(0.7);

        assert_eq!(input.metadata.tags, vec!["a".to_string()]);
        assert_eq!(input.metadata.category.as_deref(), Some("critical"));
        assert_eq!(input.importance, Some(0.7));
        assert!(input.embedding.is_none());
    }
}
