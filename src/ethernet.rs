//! Ethernet framing for a MAC that handles its own source address and CRC.
//!
//! The hardware inserts the source MAC and frame check sequence on
//! transmit and strips the CRC on receive, so the software-visible header
//! is only 8 bytes: a 6-byte destination (sender on receive) address and
//! a 2-byte ethertype.

use core::fmt;

use crate::buffer::{BufError, PktBuf};
use crate::ETH_HEADER_LEN;

// ============================================================================
// Ethertypes
// ============================================================================

/// Ethertype: IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Ethertype: ARP.
pub const ETHERTYPE_ARP: u16 = 0x0806;

// ============================================================================
// EthAddr
// ============================================================================

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthAddr(pub [u8; 6]);

impl EthAddr {
    /// All-zero address.
    pub const ZERO: EthAddr = EthAddr([0; 6]);

    /// Hardware broadcast address.
    pub const BROADCAST: EthAddr = EthAddr([0xff; 6]);

    /// Construct from six octets.
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        EthAddr([a, b, c, d, e, f])
    }

    /// Check for the broadcast address.
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }
}

impl fmt::Display for EthAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Prepend the 8-byte Ethernet header.
///
/// Widens the buffer view and writes the destination address followed by
/// the ethertype. Fails with [`BufError::NoHeadroom`] if the buffer was
/// not allocated with enough leading slack; the caller drops the packet.
pub fn frame(buf: &mut PktBuf, ethertype: u16, dst: EthAddr) -> Result<(), BufError> {
    let hdr = buf.push_head(ETH_HEADER_LEN)?;
    hdr[0..6].copy_from_slice(&dst.0);
    hdr[6..8].copy_from_slice(&ethertype.to_be_bytes());
    Ok(())
}

/// Strip the 8-byte Ethernet header from a received frame.
pub fn deframe(buf: &mut PktBuf) -> Result<(), BufError> {
    buf.pull_head(ETH_HEADER_LEN)
}

/// Read the ethertype of a framed packet.
///
/// Returns `None` if the view is too short to hold the header.
pub fn ethertype(buf: &PktBuf) -> Option<u16> {
    let view = buf.as_slice();
    if view.len() < ETH_HEADER_LEN {
        return None;
    }
    Some(u16::from_be_bytes([view[6], view[7]]))
}

/// Read the leading MAC address of a framed packet.
///
/// On receive this is the address the hardware placed first in the frame.
pub fn mac(buf: &PktBuf) -> Option<EthAddr> {
    let view = buf.as_slice();
    if view.len() < 6 {
        return None;
    }
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&view[0..6]);
    Some(EthAddr(octets))
}

/// Log a diagnostic dump of a frame the stack did not understand.
///
/// Resets the view to the raw extent first, so the dump covers the whole
/// packet regardless of how far the layers had narrowed it.
pub fn dump(buf: &mut PktBuf) {
    buf.reset_view();
    let view = buf.as_slice();
    if view.len() < ETH_HEADER_LEN {
        log::debug!("eth dump: runt frame, {} bytes", view.len());
        return;
    }
    log::debug!(
        "eth dump: mac={} ethertype={:#06x} len={}",
        EthAddr([view[0], view[1], view[2], view[3], view[4], view[5]]),
        u16::from_be_bytes([view[6], view[7]]),
        view.len()
    );
}

// ============================================================================
// Tests
// ============================================================================
