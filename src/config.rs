//! Pipeline tuning knobs
//!
//! Defaults match the reference behavior: 10 s emission windows, 60 s
//! flow idle timeout, 200-row alert listing.

use serde::{Deserialize, Serialize};

use crate::detect::RuleThresholds;

/// Emission window period (ms)
pub const DEFAULT_WINDOW_PERIOD_MS: u64 = 10_000;

/// Flow idle timeout before eviction (ms)
pub const DEFAULT_IDLE_TIMEOUT_MS: i64 = 60_000;

/// Bounded persistence queue capacity
pub const DEFAULT_PERSIST_QUEUE_CAPACITY: usize = 1024;

/// Rows returned by the recent-alerts listing
pub const DEFAULT_RECENT_ALERT_LIMIT: u32 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How often live flows are summarized into feature vectors (ms)
    pub window_period_ms: u64,
    /// A flow idle longer than this at emission time is evicted (ms)
    pub idle_timeout_ms: i64,
    /// Capacity of the bounded persistence queue; a full queue drops the
    /// newest write instead of blocking ingestion
    pub persist_queue_capacity: usize,
    /// Row limit for the recent-alerts presentation read
    pub recent_alert_limit: u32,
    /// Detection rule thresholds
    pub thresholds: RuleThresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_period_ms: DEFAULT_WINDOW_PERIOD_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            persist_queue_capacity: DEFAULT_PERSIST_QUEUE_CAPACITY,
            recent_alert_limit: DEFAULT_RECENT_ALERT_LIMIT,
            thresholds: RuleThresholds::default(),
        }
    }
}
