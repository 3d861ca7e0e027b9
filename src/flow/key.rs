//! Flow identity

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// 5-tuple flow identity, order-sensitive.
///
/// Direction is NOT canonicalized: a request and its reply are tracked
/// as two distinct flows. Rule thresholds downstream are calibrated
/// against that behavior, so keep it when touching this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: u8,
}

impl FlowKey {
    pub fn new(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: Option<u16>,
        dst_port: Option<u16>,
        protocol: u8,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }
}

/// Canonical string form `src|dst|srcPort|dstPort|proto`, with `_` for
/// an absent port. Used as the natural key in the flow store and as the
/// `flow_key` field of feature vectors.
impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn port(p: Option<u16>) -> String {
            p.map_or_else(|| "_".to_string(), |p| p.to_string())
        }
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.src_ip,
            self.dst_ip,
            port(self.src_port),
            port(self.dst_port),
            self.protocol
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
