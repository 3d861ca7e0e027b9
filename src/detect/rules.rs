//! Detection rules & thresholds

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::detect::alert::Alert;
use crate::flow::FeatureVector;

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Packet count above which the rate rule may fire (strict)
pub const PACKET_COUNT_MIN: u64 = 500;

/// Mean inter-arrival below which the rate rule may fire (strict, ms)
pub const AVG_IAT_MAX_MS: f64 = 5.0;

/// Fixed confidence reported by the rate rule
pub const HIGH_PACKET_RATE_CONFIDENCE: f64 = 0.8;

/// Tunable thresholds for the built-in rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleThresholds {
    /// Fires only strictly above this packet count
    pub packet_count_min: u64,
    /// Fires only strictly below this mean inter-arrival (ms)
    pub avg_iat_max_ms: f64,
    /// Confidence attached to packet-rate alerts
    pub confidence: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            packet_count_min: PACKET_COUNT_MIN,
            avg_iat_max_ms: AVG_IAT_MAX_MS,
            confidence: HIGH_PACKET_RATE_CONFIDENCE,
        }
    }
}

// ============================================================================
// RULE TRAIT
// ============================================================================

/// One detection rule: a pure predicate over a window feature vector.
///
/// Rules must be independent of one another and of evaluation order;
/// the engine concatenates whatever each of them returns. `now_ms` is
/// the evaluation timestamp, passed in so rules stay deterministic.
pub trait Rule: Send + Sync {
    /// Stable name, also used as the alert type tag
    fn name(&self) -> &'static str;

    fn evaluate(&self, vector: &FeatureVector, now_ms: i64) -> Vec<Alert>;
}

// ============================================================================
// HIGH PACKET RATE
// ============================================================================

/// Flags flows sending an unusually dense packet train within a window:
/// packet count above the threshold AND mean inter-arrival below it.
pub struct HighPacketRateRule {
    thresholds: RuleThresholds,
}

impl HighPacketRateRule {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }
}

impl Default for HighPacketRateRule {
    fn default() -> Self {
        Self::new(RuleThresholds::default())
    }
}

impl Rule for HighPacketRateRule {
    fn name(&self) -> &'static str {
        "high_packet_rate"
    }

    fn evaluate(&self, vector: &FeatureVector, now_ms: i64) -> Vec<Alert> {
        if vector.packets > self.thresholds.packet_count_min
            && vector.avg_iat_ms < self.thresholds.avg_iat_max_ms
        {
            vec![Alert::new(
                self.name(),
                "High packet rate detected",
                now_ms,
                self.thresholds.confidence,
                json!({
                    "pkts": vector.packets,
                    "avg_iat_ms": vector.avg_iat_ms,
                }),
            )]
        } else {
            Vec::new()
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
