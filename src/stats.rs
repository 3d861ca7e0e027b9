//! Pipeline counters
//!
//! Cheap atomic counters bumped on the hot path, sampled into a
//! serializable snapshot for diagnostics. Owned by the pipeline rather
//! than process-wide so independent pipelines (and tests) don't share
//! state.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Counters {
    /// Datagrams handed to the pipeline
    pub packets_seen: AtomicU64,
    /// Datagrams skipped as malformed / non-IPv4
    pub packets_dropped: AtomicU64,
    /// TCP/UDP packets whose payload was too short to carry ports
    pub ports_missing: AtomicU64,
    /// Durability writes dropped on a full queue
    pub writes_dropped: AtomicU64,
    /// Durability writes rejected by the store
    pub writes_failed: AtomicU64,
    /// Alerts raised by the rule engine
    pub alerts_raised: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self, live_flows: usize) -> PipelineStats {
        PipelineStats {
            packets_seen: self.packets_seen.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            ports_missing: self.ports_missing.load(Ordering::Relaxed),
            live_flows,
            writes_dropped: self.writes_dropped.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pipeline statistics
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub packets_seen: u64,
    pub packets_dropped: u64,
    pub ports_missing: u64,
    pub live_flows: usize,
    pub writes_dropped: u64,
    pub writes_failed: u64,
    pub alerts_raised: u64,
}
