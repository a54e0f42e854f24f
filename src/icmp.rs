//! ICMP echo: outgoing pings and replies to incoming pings.
//!
//! Only echo is implemented; every other ICMP type is ignored by the
//! dispatcher. Replies refuse payloads of a kilobyte or more so the
//! device cannot be used as a traffic amplifier.

use crate::buffer::PktBuf;
use crate::checksum::insert_checksum;

// ============================================================================
// Constants
// ============================================================================

/// ICMP type: echo request.
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// ICMP type: echo reply.
pub const ICMP_ECHO_REPLY: u8 = 0;

/// Echo requests with a payload at or above this size are not answered.
pub const MAX_ECHO_PAYLOAD: usize = 1024;

/// Minimum ICMP message size (type, code, checksum, identifier words).
pub const MIN_ECHO_LEN: usize = 8;

/// Stride applied to the ping identifier between outgoing pings.
pub const PING_ID_STRIDE: u32 = 0x9e37_79b9;

// ============================================================================
// Errors
// ============================================================================

/// Reasons an incoming echo request is not answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpError {
    /// First byte was not the echo-request type.
    NotEchoRequest,
    /// Payload at or above [`MAX_ECHO_PAYLOAD`]; refused to amplify.
    TooLarge,
}

// ============================================================================
// Builders
// ============================================================================

/// Build an echo reply from the view of a received echo request.
///
/// The request payload is copied verbatim; the type byte becomes
/// echo-reply and bytes 1..4 are zeroed before the checksum is
/// recomputed. (That zeroes the code byte along with the checksum field,
/// exactly as the original firmware does.)
pub fn build_echo_reply(request: &[u8]) -> Result<PktBuf, IcmpError> {
    if request.first() != Some(&ICMP_ECHO_REQUEST) {
        return Err(IcmpError::NotEchoRequest);
    }
    let len = request.len().max(MIN_ECHO_LEN);
    if len >= MAX_ECHO_PAYLOAD {
        return Err(IcmpError::TooLarge);
    }

    let mut pkt = PktBuf::for_payload(len);
    let body = pkt.as_mut_slice();
    body[..request.len()].copy_from_slice(request);
    body[0] = ICMP_ECHO_REPLY;
    body[1] = 0;
    insert_checksum(body, 2);
    Ok(pkt)
}

/// Build an 8-byte echo request carrying a 32-bit identifier.
///
/// The dispatcher advances its identifier counter by [`PING_ID_STRIDE`]
/// per ping so successive requests are distinguishable on the wire.
pub fn build_echo_request(id: u32) -> PktBuf {
    let mut pkt = PktBuf::for_payload(MIN_ECHO_LEN);
    let body = pkt.as_mut_slice();
    body[0] = ICMP_ECHO_REQUEST;
    body[1] = 0;
    body[4..8].copy_from_slice(&id.to_be_bytes());
    insert_checksum(body, 2);
    pkt
}

// ============================================================================
// Tests
// ============================================================================
