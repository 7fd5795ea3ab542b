//! Engine configuration.
//!
//! Each component owns its own config struct; [`EngineConfig`] bundles them
//! for the orchestrator. Every struct uses `#[serde(default)]`, so partial
//! JSON documents fill in the rest from defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::fusion::FusionConfig;
use crate::index::IndexConfig;
use crate::memory::StoreConfig;

/// Search behaviour of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result count when a query gives no limit
    pub default_limit: usize,
    /// Each source fetches `limit * candidate_multiplier` candidates before fusion
    pub candidate_multiplier: usize,
    /// MMR trade-off; `None` disables diversification
    pub mmr_lambda: Option<f64>,
    /// Timeout for each embedding provider call
    pub embed_timeout_ms: u64,
    /// Whether expanded-term keyword matching is a fusion source
    pub use_keyword_source: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            candidate_multiplier: 4,
            mmr_lambda: None,
            embed_timeout_ms: 10_000,
            use_keyword_source: true,
        }
    }
}

impl SearchConfig {
    pub fn with_mmr(mut self, lambda: f64) -> Self {
        self.mmr_lambda = Some(lambda);
        self
    }

    pub fn with_embed_timeout_ms(mut self, ms: u64) -> Self {
        self.embed_timeout_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 {
            return Err(Error::Config("default_limit must be positive".into()));
        }
        if self.candidate_multiplier == 0 {
            return Err(Error::Config("candidate_multiplier must be positive".into()));
        }
        if self.embed_timeout_ms == 0 {
            return Err(Error::Config("embed_timeout_ms must be positive".into()));
        }
        if let Some(lambda) = self.mmr_lambda {
            if !(0.0..=1.0).contains(&lambda) {
                return Err(Error::Config(format!("mmr_lambda must be within [0, 1], got {}", lambda)));
            }
        }
        Ok(())
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index: IndexConfig,
    pub fusion: FusionConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
}

impl EngineConfig {
    /// Parse from JSON and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.index.validate()?;
        self.fusion.validate()?;
        self.store.validate()?;
        self.search.validate()?;
        Ok(())
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }
}
