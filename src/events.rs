//! Memory lifecycle events.
//!
//! Events are published on a broadcast channel so hosts can observe tier
//! movement without polling. Nothing in the retrieval path depends on them;
//! publishing with no subscribers is silently ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::memory::{MemoryId, Tier};

/// Why a memory changed tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierChangeReason {
    /// Working set exceeded its capacity
    Capacity,
    /// Computed importance fell below the archive threshold
    Decay,
    /// Computed importance rose above the promotion threshold
    Importance,
    /// Retrieved while archived
    Access,
}

impl std::fmt::Display for TierChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capacity => write!(f, "capacity"),
            Self::Decay => write!(f, "decay"),
            Self::Importance => write!(f, "importance"),
            Self::Access => write!(f, "access"),
        }
    }
}

/// Observable memory lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MemoryEvent {
    Stored { id: MemoryId, tier: Tier },
    Retrieved { id: MemoryId, tier: Tier },
    Promoted { id: MemoryId, from: Tier, to: Tier, reason: TierChangeReason },
    Demoted { id: MemoryId, from: Tier, to: Tier, reason: TierChangeReason },
    Compressed { id: MemoryId },
    Deleted { id: MemoryId },
    Expired { count: usize },
    Cleared,
}

impl MemoryEvent {
    /// The memory this event concerns, if any.
    pub fn memory_id(&self) -> Option<MemoryId> {
        match self {
            Self::Stored { id, .. }
            | Self::Retrieved { id, .. }
            | Self::Promoted { id, .. }
            | Self::Demoted { id, .. }
            | Self::Compressed { id }
            | Self::Deleted { id } => Some(*id),
            Self::Expired { .. } | Self::Cleared => None,
        }
    }
}

/// Broadcast bus for [`MemoryEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MemoryEvent>,
}

impl EventBus {
    /// Default channel capacity. Slow subscribers observe `Lagged` past this.
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: MemoryEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
