//! IPv4 layer: fixed 20-byte headers, no options, no fragmentation.
//!
//! The stack builds exactly one header shape (version 4, IHL 5, TTL 128)
//! and parses incoming headers by their IHL field alone. Routing is a
//! single decision made by the ARP resolver: on-link destinations resolve
//! directly, everything else goes to the default gateway.

use core::fmt;

use crate::buffer::{BufError, PktBuf};
use crate::checksum::{checksum, insert_checksum};
use crate::{ETH_HEADER_LEN, IPV4_HEADER_LEN};

// ============================================================================
// Protocol Numbers
// ============================================================================

/// IPv4 sub-protocol: ICMP.
pub const PROTO_ICMP: u8 = 1;

/// IPv4 sub-protocol: UDP.
pub const PROTO_UDP: u8 = 17;

/// Time-to-live written into every outgoing header.
pub const IP_TTL: u8 = 128;

/// Minimum leading slack required before an IP header may be built:
/// 20 bytes for the header itself, 8 for the Ethernet header that will
/// follow it, and a margin of 4.
pub const TX_MIN_SLACK: usize = IPV4_HEADER_LEN + ETH_HEADER_LEN + 4;

/// Stride applied to the packet-id counter between packets. A large odd
/// step spreads successive ids across the 16-bit field.
pub const IP_ID_STRIDE: u16 = 0x9e37;

// ============================================================================
// Ipv4Addr
// ============================================================================

/// IPv4 address (4 octets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    /// All zeros (0.0.0.0).
    pub const UNSPECIFIED: Ipv4Addr = Ipv4Addr([0; 4]);

    /// Construct from 4 octets.
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Addr([a, b, c, d])
    }

    /// The raw octets.
    #[inline]
    pub fn octets(&self) -> [u8; 4] {
        self.0
    }

    /// The address as a host-order integer, for mask arithmetic.
    #[inline]
    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Check whether `other` is on the same subnet under `mask`.
    #[inline]
    pub fn same_subnet(self, other: Ipv4Addr, mask: Ipv4Addr) -> bool {
        (self.to_u32() ^ other.to_u32()) & mask.to_u32() == 0
    }
}

impl From<u32> for Ipv4Addr {
    fn from(ip: u32) -> Self {
        Ipv4Addr(ip.to_be_bytes())
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from IPv4 parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv4Error {
    /// The view is too short for the header it claims to carry.
    Truncated,
    /// The header checksum does not verify.
    ChecksumMismatch,
}

// ============================================================================
// Header Building
// ============================================================================

/// Prepend a 20-byte IPv4 header to the buffer view.
///
/// The total-length field covers the header plus whatever the view held
/// before the call; the checksum is computed over the header only.
///
/// # Arguments
///
/// * `proto` - sub-protocol number ([`PROTO_ICMP`], [`PROTO_UDP`])
/// * `src`, `dst` - addresses written into the header
/// * `id` - identification field; the dispatcher advances its counter by
///   [`IP_ID_STRIDE`] per packet
pub fn build_header(
    buf: &mut PktBuf,
    proto: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    id: u16,
) -> Result<(), BufError> {
    let total_len = (buf.len() + IPV4_HEADER_LEN) as u16;
    let hdr = buf.push_head(IPV4_HEADER_LEN)?;

    hdr[0] = 0x45; // version 4, IHL 5
    hdr[1] = 0x00;
    hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
    hdr[4..6].copy_from_slice(&id.to_be_bytes());
    hdr[6] = 0x00; // flags
    hdr[7] = 0x00; // fragment offset
    hdr[8] = IP_TTL;
    hdr[9] = proto;
    hdr[10] = 0x00; // checksum, inserted below
    hdr[11] = 0x00;
    hdr[12..16].copy_from_slice(&src.0);
    hdr[16..20].copy_from_slice(&dst.0);

    insert_checksum(&mut hdr[..IPV4_HEADER_LEN], 10);
    Ok(())
}

// ============================================================================
// Parsing
// ============================================================================

/// Strip the IPv4 header (IHL field × 4 bytes) from a received packet.
pub fn deframe(buf: &mut PktBuf) -> Result<(), Ipv4Error> {
    let view = buf.as_slice();
    if view.is_empty() {
        return Err(Ipv4Error::Truncated);
    }
    let ihl = usize::from(view[0] & 0x0f) * 4;
    buf.pull_head(ihl).map_err(|_| Ipv4Error::Truncated)
}

/// Source address of a packet positioned at its IPv4 header.
pub fn src(buf: &PktBuf) -> Result<Ipv4Addr, Ipv4Error> {
    field4(buf, 12)
}

/// Destination address of a packet positioned at its IPv4 header.
pub fn dst(buf: &PktBuf) -> Result<Ipv4Addr, Ipv4Error> {
    field4(buf, 16)
}

/// Sub-protocol number of a packet positioned at its IPv4 header.
pub fn protocol(buf: &PktBuf) -> Result<u8, Ipv4Error> {
    let view = buf.as_slice();
    if view.len() < IPV4_HEADER_LEN {
        return Err(Ipv4Error::Truncated);
    }
    Ok(view[9])
}

/// Verify the header checksum of a packet positioned at its IPv4 header.
///
/// Computing the checksum over a correctly populated header yields zero.
pub fn validate(buf: &PktBuf) -> Result<(), Ipv4Error> {
    let view = buf.as_slice();
    if view.len() < IPV4_HEADER_LEN {
        return Err(Ipv4Error::Truncated);
    }
    let ihl = usize::from(view[0] & 0x0f) * 4;
    if ihl < IPV4_HEADER_LEN || view.len() < ihl {
        return Err(Ipv4Error::Truncated);
    }
    if checksum(&view[..ihl]) != 0 {
        return Err(Ipv4Error::ChecksumMismatch);
    }
    Ok(())
}

fn field4(buf: &PktBuf, at: usize) -> Result<Ipv4Addr, Ipv4Error> {
    let view = buf.as_slice();
    if view.len() < IPV4_HEADER_LEN {
        return Err(Ipv4Error::Truncated);
    }
    Ok(Ipv4Addr([view[at], view[at + 1], view[at + 2], view[at + 3]]))
}

// ============================================================================
// Tests
// ============================================================================
