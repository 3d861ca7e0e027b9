//! Rule engine
//!
//! Registered list of independent rules. Every rule runs on every
//! vector; results are concatenated, never short-circuited, so rules
//! can be added without touching the dispatcher.

use super::alert::Alert;
use super::rules::{HighPacketRateRule, Rule, RuleThresholds};
use crate::flow::FeatureVector;

pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleEngine {
    /// Engine with no rules registered
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Engine with the built-in rule set
    pub fn with_defaults(thresholds: RuleThresholds) -> Self {
        let mut engine = Self::empty();
        engine.register(Box::new(HighPacketRateRule::new(thresholds)));
        engine
    }

    pub fn register(&mut self, rule: Box<dyn Rule>) {
        log::debug!("[detect] rule registered: {}", rule.name());
        self.rules.push(rule);
    }

    /// Evaluate one vector against every registered rule.
    pub fn evaluate(&self, vector: &FeatureVector, now_ms: i64) -> Vec<Alert> {
        self.rules
            .iter()
            .flat_map(|rule| rule.evaluate(vector, now_ms))
            .collect()
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_defaults(RuleThresholds::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
