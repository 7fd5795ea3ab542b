//! Importance scoring: initial estimation and time-decayed, access-boosted scores.
//!
//! The computed score is always derived from the other fields of
//! [`ImportanceState`] and the current time:
//!
//! ```text
//! computed = clamp(base * (1 + 0.1 * ln(access_count + 1)) * exp(-decay_rate * days_since_access), 0, 1)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::MemoryMetadata;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Importance bookkeeping for a single memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportanceState {
    pub base_score: f64,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
    /// Decay per day since last access
    pub decay_rate: f64,
    /// Cached result of [`ImportanceState::compute`]; never authoritative
    pub computed_score: f64,
}

impl ImportanceState {
    pub fn new(base_score: f64, decay_rate: f64, now: DateTime<Utc>) -> Self {
        let mut state = Self {
            base_score: base_score.clamp(0.0, 1.0),
            access_count: 0,
            last_accessed_at: now,
            decay_rate: decay_rate.max(0.0),
            computed_score: 0.0,
        };
        state.refresh(now);
        state
    }

    /// Compute the current score without mutating.
    pub fn compute(&self, now: DateTime<Utc>) -> f64 {
        calculate_importance(
            self.base_score,
            self.access_count,
            days_between(self.last_accessed_at, now),
            self.decay_rate,
        )
    }

    /// Recompute and cache the score.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> f64 {
        self.computed_score = self.compute(now);
        self.computed_score
    }

    /// Count an access at `now` and recompute.
    pub fn record_access(&mut self, now: DateTime<Utc>) -> f64 {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now;
        self.refresh(now)
    }
}

/// Boost from repeated access: `1 + 0.1 * ln(count + 1)`.
pub fn access_boost(access_count: u64) -> f64 {
    1.0 + 0.1 * ((access_count as f64) + 1.0).ln()
}

/// Exponential decay: `exp(-rate * days)`. Negative elapsed time counts as zero.
pub fn decay_factor(decay_rate: f64, days: f64) -> f64 {
    (-decay_rate * days.max(0.0)).exp()
}

/// Importance from its components, clamped to `[0, 1]`.
pub fn calculate_importance(
    base_score: f64,
    access_count: u64,
    days_since_access: f64,
    decay_rate: f64,
) -> f64 {
    let score = base_score * access_boost(access_count) * decay_factor(decay_rate, days_since_access);
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let millis = (to - from).num_milliseconds() as f64;
    millis / 1000.0 / SECONDS_PER_DAY
}

/// Heuristic importance estimation for memories stored without an explicit score.
#[derive(Debug, Clone)]
pub struct ImportanceEstimator {
    keywords: Vec<String>,
}

impl ImportanceEstimator {
    const BASE: f64 = 0.5;
    const LENGTH_CAP: f64 = 0.1;
    const KEYWORD_BONUS: f64 = 0.05;
    const CRITICAL_CATEGORY_BONUS: f64 = 0.2;
    const IMPORTANT_TAG_BONUS: f64 = 0.1;

    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Estimate importance from content and metadata.
    ///
    /// 0.5 base, up to 0.1 for length (one point per thousand characters),
    /// 0.05 per matched keyword, +0.2 for category "critical",
    /// +0.1 for tag "important", capped at 1.0.
    pub fn estimate(&self, content: &str, metadata: &MemoryMetadata) -> f64 {
        let length_term = (content.chars().count() as f64 / 1000.0).min(Self::LENGTH_CAP);

        let matched = self.matched_keywords(content).len();
        let keyword_term = matched as f64 * Self::KEYWORD_BONUS;

        let mut flags = 0.0;
        if metadata
            .category
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case("critical"))
            .unwrap_or(false)
        {
            flags += Self::CRITICAL_CATEGORY_BONUS;
        }
        if metadata.has_tag("important") {
            flags += Self::IMPORTANT_TAG_BONUS;
        }

        (Self::BASE + length_term + keyword_term + flags).min(1.0)
    }

    /// Distinct keywords present in `text` as whole words.
    pub fn matched_keywords(&self, text: &str) -> Vec<&str> {
        let words: std::collections::HashSet<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        self.keywords
            .iter()
            .filter(|k| words.contains(k.as_str()))
            .map(|k| k.as_str())
            .collect()
    }

    pub fn contains_keyword(&self, text: &str) -> bool {
        !self.matched_keywords(text).is_empty()
    }
}

/// Keywords that raise estimated importance and mark key points during compression.
pub fn default_importance_keywords() -> Vec<String> {
    [
        "critical",
        "important",
        "must",
        "urgent",
        "essential",
        "required",
        "remember",
        "always",
        "never",
        "deadline",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
