//! Window feature vector
//!
//! Fixed-shape summary of one flow's activity, produced once per flow
//! per emission window and consumed exactly once by the rule engine.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Canonical flow key string (see [`crate::flow::FlowKey`])
    pub flow_key: String,
    /// First-seen timestamp of the flow (ms)
    pub window_start_ms: i64,
    pub packets: u64,
    pub bytes: u64,
    /// bytes / packets, 0.0 for an empty flow
    pub avg_packet_size: f64,
    /// duration / (packets - 1), or the whole duration for a
    /// single-packet flow (ms)
    pub avg_iat_ms: f64,
    /// Reserved for multi-destination aggregation; always 1 while flows
    /// are tracked per 5-tuple
    pub unique_dst_count: u32,
    pub protocol: u8,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}
