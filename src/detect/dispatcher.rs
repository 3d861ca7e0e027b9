//! Detection dispatcher
//!
//! Feeds each vector of a window batch through the rule engine and
//! hands every resulting alert to an [`AlertSink`]. Persistence is
//! best-effort: one failed hand-off is logged and the rest of the batch
//! continues.

use super::alert::Alert;
use super::engine::RuleEngine;
use crate::flow::FeatureVector;

/// Durability seam for alerts. The production sink is the pipeline's
/// bounded persistence queue; tests substitute their own.
pub trait AlertSink: Send + Sync {
    /// Hand one alert to durability. Errors are reported back only so
    /// the dispatcher can count and log them; they must not propagate.
    fn persist(&self, alert: Alert) -> crate::Result<()>;
}

pub struct DetectionDispatcher<S: AlertSink> {
    engine: RuleEngine,
    sink: S,
}

impl<S: AlertSink> DetectionDispatcher<S> {
    pub fn new(engine: RuleEngine, sink: S) -> Self {
        Self { engine, sink }
    }

    /// Run one window batch through detection. Returns the number of
    /// alerts raised (whether or not their persistence succeeded).
    pub fn dispatch(&self, batch: &[FeatureVector], now_ms: i64) -> u64 {
        let mut raised = 0u64;
        for vector in batch {
            for alert in self.engine.evaluate(vector, now_ms) {
                log::warn!(
                    "[detect] {} on flow {} (confidence {:.2})",
                    alert.alert_type,
                    vector.flow_key,
                    alert.confidence
                );
                raised += 1;
                if let Err(e) = self.sink.persist(alert) {
                    log::warn!("[detect] alert write failed: {}", e);
                }
            }
        }
        raised
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::detect::rules::RuleThresholds;
    use crate::Error;

    fn vector(packets: u64, avg_iat_ms: f64) -> FeatureVector {
        FeatureVector {
            flow_key: format!("10.0.0.1|10.0.0.2|{}|80|6", 1000 + packets),
            window_start_ms: 0,
            packets,
            bytes: packets * 100,
            avg_packet_size: 100.0,
            avg_iat_ms,
            unique_dst_count: 1,
            protocol: 6,
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            src_port: Some(1000),
            dst_port: Some(80),
        }
    }

    /// Records every persist attempt; fails on the attempt at `fail_at`.
    struct FlakySink {
        attempts: AtomicUsize,
        fail_at: usize,
        persisted: Mutex<Vec<Alert>>,
    }

    impl FlakySink {
        fn new(fail_at: usize) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                fail_at,
                persisted: Mutex::new(Vec::new()),
            }
        }
    }

    impl AlertSink for &FlakySink {
        fn persist(&self, alert: Alert) -> crate::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt == self.fail_at {
                return Err(Error::QueueFull);
            }
            self.persisted.lock().push(alert);
            Ok(())
        }
    }

    #[test]
    fn test_batch_dispatch_raises_per_vector() {
        let sink = FlakySink::new(usize::MAX);
        let dispatcher = DetectionDispatcher::new(RuleEngine::default(), &sink);

        let batch = vec![vector(501, 1.0), vector(3, 100.0), vector(900, 0.5)];
        let raised = dispatcher.dispatch(&batch, 0);

        assert_eq!(raised, 2);
        assert_eq!(sink.persisted.lock().len(), 2);
    }

    #[test]
    fn test_one_failed_write_does_not_abort_the_batch() {
        let sink = FlakySink::new(1); // second alert's write fails
        let dispatcher = DetectionDispatcher::new(
            RuleEngine::with_defaults(RuleThresholds::default()),
            &sink,
        );

        let batch: Vec<FeatureVector> = (0..5).map(|i| vector(501 + i, 1.0)).collect();
        let raised = dispatcher.dispatch(&batch, 0);

        assert_eq!(raised, 5);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 5);
        // N alerts, one simulated failure, N-1 persisted
        assert_eq!(sink.persisted.lock().len(), 4);
    }

    #[test]
    fn test_quiet_batch_is_silent() {
        let sink = FlakySink::new(usize::MAX);
        let dispatcher = DetectionDispatcher::new(RuleEngine::default(), &sink);
        assert_eq!(dispatcher.dispatch(&[vector(10, 50.0)], 0), 0);
        assert!(sink.persisted.lock().is_empty());
    }
}
