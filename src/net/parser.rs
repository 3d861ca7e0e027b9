//! IPv4 datagram parsing
//!
//! Minimal decoder for the capture path: version-4, minimum-length
//! headers only. No options interpretation, no fragmentation, no
//! checksum or total-length cross-validation.

use std::net::Ipv4Addr;

/// Minimum IPv4 header size (IHL = 5)
pub const MIN_HEADER_LEN: usize = 20;

/// Offset of the protocol byte in the header
const PROTOCOL_OFFSET: usize = 9;

/// Offset of the source address in the header
const SRC_ADDR_OFFSET: usize = 12;

/// Offset of the destination address in the header
const DST_ADDR_OFFSET: usize = 16;

/// One decoded IPv4 datagram. Owned by the call that parsed it; the
/// pipeline never retains it past the packet it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Datagram {
    pub version: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub payload: Vec<u8>,
}

/// Decode one raw datagram.
///
/// Returns `None` for anything that is not a well-formed minimum IPv4
/// header: empty input, a version nibble other than 4, an IHL below 5,
/// or a buffer too short to hold the fixed header. Truncated reads are
/// expected on a live capture and are skipped, not reported.
pub fn parse(packet: &[u8]) -> Option<Ipv4Datagram> {
    if packet.is_empty() {
        return None;
    }

    let version = packet[0] >> 4;
    if version != 4 {
        return None;
    }

    let ihl = (packet[0] & 0x0f) as usize;
    if ihl < 5 || packet.len() < MIN_HEADER_LEN {
        return None;
    }

    let protocol = packet[PROTOCOL_OFFSET];
    let src = Ipv4Addr::new(
        packet[SRC_ADDR_OFFSET],
        packet[SRC_ADDR_OFFSET + 1],
        packet[SRC_ADDR_OFFSET + 2],
        packet[SRC_ADDR_OFFSET + 3],
    );
    let dst = Ipv4Addr::new(
        packet[DST_ADDR_OFFSET],
        packet[DST_ADDR_OFFSET + 1],
        packet[DST_ADDR_OFFSET + 2],
        packet[DST_ADDR_OFFSET + 3],
    );

    // The total-length field is deliberately not cross-checked against
    // the buffer; a declared header past the end just means no payload.
    let header_len = ihl * 4;
    let payload = if packet.len() > header_len {
        packet[header_len..].to_vec()
    } else {
        Vec::new()
    };

    Some(Ipv4Datagram {
        version,
        protocol,
        src,
        dst,
        payload,
    })
}

// ============================================================================
// TESTS
// ============================================================================
