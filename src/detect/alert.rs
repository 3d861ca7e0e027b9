//! Detection alerts

use serde::{Deserialize, Serialize};

/// One alert raised by a rule. Ownership transfers to the alert store
/// as soon as the dispatcher hands it off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable type tag, e.g. `high_packet_rate`
    pub alert_type: String,
    /// Human-readable one-liner
    pub message: String,
    pub ts_ms: i64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Structured evidence, serialized to TEXT for storage
    pub evidence: serde_json::Value,
}

impl Alert {
    pub fn new(
        alert_type: &str,
        message: &str,
        ts_ms: i64,
        confidence: f64,
        evidence: serde_json::Value,
    ) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            message: message.to_string(),
            ts_ms,
            confidence: confidence.clamp(0.0, 1.0),
            evidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let evidence = serde_json::json!({});
        assert_eq!(Alert::new("t", "m", 0, 1.7, evidence.clone()).confidence, 1.0);
        assert_eq!(Alert::new("t", "m", 0, -0.2, evidence).confidence, 0.0);
    }
}
