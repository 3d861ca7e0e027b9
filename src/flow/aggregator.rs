//! Live flow table
//!
//! Concurrent 5-tuple -> aggregate map shared by the ingestion path and
//! the window timer. Per-key updates are atomic entry operations on a
//! sharded map; the periodic sweep never holds a table-wide lock across
//! I/O. Owned by the pipeline, constructed at start and dropped at stop.

use dashmap::DashMap;
use serde::Serialize;

use super::key::FlowKey;
use super::vector::FeatureVector;

/// Running counters for one live flow.
///
/// Counters are cumulative for the lifetime of the flow entry; they are
/// NOT reset between emission windows (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlowAggregate {
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub bytes: u64,
    pub packets: u64,
}

impl FlowAggregate {
    /// Summarize into a window feature vector.
    ///
    /// duration is clamped to >= 1 ms so single-packet flows still get a
    /// meaningful inter-arrival value.
    pub fn to_vector(&self, key: &FlowKey) -> FeatureVector {
        let duration_ms = (self.last_seen_ms - self.first_seen_ms).max(1);
        let avg_packet_size = if self.packets > 0 {
            self.bytes as f64 / self.packets as f64
        } else {
            0.0
        };
        let avg_iat_ms = if self.packets > 1 {
            duration_ms as f64 / (self.packets - 1) as f64
        } else {
            duration_ms as f64
        };

        FeatureVector {
            flow_key: key.to_string(),
            window_start_ms: self.first_seen_ms,
            packets: self.packets,
            bytes: self.bytes,
            avg_packet_size,
            avg_iat_ms,
            unique_dst_count: 1,
            protocol: key.protocol,
            src_ip: key.src_ip,
            dst_ip: key.dst_ip,
            src_port: key.src_port,
            dst_port: key.dst_port,
        }
    }
}

pub struct FlowAggregator {
    flows: DashMap<FlowKey, FlowAggregate>,
    idle_timeout_ms: i64,
}

impl FlowAggregator {
    pub fn new(idle_timeout_ms: i64) -> Self {
        Self {
            flows: DashMap::new(),
            idle_timeout_ms,
        }
    }

    /// Insert-or-update the aggregate for `key`.
    ///
    /// The whole mutation happens inside one map entry operation, so a
    /// key is never observable in a half-updated state under concurrent
    /// writers. Returns a snapshot of the post-update aggregate so the
    /// caller can hand it to durability without touching the map again.
    pub fn update(&self, key: FlowKey, payload_len: usize, now_ms: i64) -> FlowAggregate {
        let entry = self
            .flows
            .entry(key)
            .and_modify(|agg| {
                agg.bytes += payload_len as u64;
                agg.packets += 1;
                agg.last_seen_ms = now_ms;
            })
            .or_insert(FlowAggregate {
                first_seen_ms: now_ms,
                last_seen_ms: now_ms,
                bytes: payload_len as u64,
                packets: 1,
            });
        *entry
    }

    /// Summarize every live flow into a feature vector, then evict the
    /// flows idle longer than the threshold. An empty table yields an
    /// empty batch.
    pub fn emit_window(&self, now_ms: i64) -> Vec<FeatureVector> {
        let mut batch = Vec::with_capacity(self.flows.len());
        self.flows.retain(|key, agg| {
            batch.push(agg.to_vector(key));
            now_ms - agg.last_seen_ms <= self.idle_timeout_ms
        });
        batch
    }

    /// Number of live flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &FlowKey) -> Option<FlowAggregate> {
        self.flows.get(key).map(|agg| *agg)
    }
}

// ============================================================================
// TESTS
// ============================================================================
