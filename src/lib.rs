//! Network stack and FFT transfer protocol for an embedded compute accelerator.
//!
//! This crate implements the on-device protocol stack that sits between a
//! hardware Ethernet MAC and a hardware FFT engine:
//! - Packet buffers with reserved header room and a sliding per-layer view
//! - Ethernet framing for a MAC that supplies the source address and CRC
//!   itself (so frames carry only an 8-byte destination + ethertype header)
//! - ARP resolution with a small aging cache and a default-gateway shortcut
//! - IPv4 (no options, no fragments), ICMP echo, and UDP
//! - A positional-acknowledgment bulk-transfer session that streams 1024
//!   samples into the FFT engine and the transform back out, over UDP
//!
//! # Architecture
//!
//! ```text
//!                   +------------------+
//!                   |    MacDevice     |
//!                   | (hardware MAC)   |
//!                   +--------+---------+
//!                            |
//!                   +--------v---------+
//!                   |     Ethernet     |
//!                   |  (frame/deframe) |
//!                   +--------+---------+
//!                            |
//!            +---------------+---------------+
//!            |                               |
//!   +--------v---------+           +---------v--------+
//!   |       IPv4       |           |       ARP        |
//!   |  (build/parse)   |           |  (cache/reply)   |
//!   +--------+---------+           +------------------+
//!            |
//!   +--------+---------+
//!   |                  |
//! +-v----+        +----v----+      +------------------+
//! | ICMP |        |   UDP   +------>   FFT session    |
//! +------+        +---------+      |  (FftEngine)     |
//!                                  +------------------+
//! ```
//!
//! # Design
//!
//! There is exactly one logical thread of control: a non-preemptive poll
//! loop reads a pending-interrupt bitmask once per iteration and services
//! timer, receive, and transmit-complete events in that order. Nothing
//! blocks; waiting on a peer means returning to the loop and being invoked
//! again on the next matching event.
//!
//! All mutable protocol state (ARP cache, transfer session, the single
//! deferred-transmit slot, statistics) lives in the [`Stack`] context
//! object rather than in module-level globals, so independent stacks can
//! be constructed and exercised side by side. The lower layers expose pure
//! encode/decode functions over [`PktBuf`] views; the dispatcher in
//! [`stack`] owns the call graph between them.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arp;
pub mod buffer;
pub mod checksum;
pub mod device;
pub mod ethernet;
pub mod fft;
pub mod icmp;
pub mod ipv4;
pub mod stack;
pub mod udp;

pub use arp::{ArpCache, ArpError, ArpLookup, ArpResult, ARP_PACKET_LEN};
pub use buffer::{BufError, PktBuf};
pub use checksum::checksum;
pub use device::{MacDevice, RxError, IRQ_NET_RX, IRQ_NET_TX, IRQ_TIMER};
pub use ethernet::{EthAddr, ETHERTYPE_ARP, ETHERTYPE_IPV4};
pub use fft::{FftEngine, FftPhase, FftSession, FFT_PORT, FFT_SIZE};
pub use icmp::{IcmpError, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST};
pub use ipv4::{Ipv4Addr, PROTO_ICMP, PROTO_UDP};
pub use stack::{NetConfig, NetStats, Stack};

// ============================================================================
// Header Sizes
// ============================================================================

/// Ethernet header size handled in software (6 destination + 2 ethertype).
///
/// The MAC hardware inserts the source address and CRC itself, so frames
/// never carry the textbook 14-byte header.
pub const ETH_HEADER_LEN: usize = 8;

/// IPv4 header size (no options are ever generated or accepted).
pub const IPV4_HEADER_LEN: usize = 20;

/// UDP header size.
pub const UDP_HEADER_LEN: usize = 8;

/// FFT transfer header size (transfer id + position, both big-endian u16).
pub const FFT_HEADER_LEN: usize = 4;

/// Leading slack reserved in front of every outgoing payload.
///
/// 8 (Ethernet) + 20 (IPv4) + 8 (UDP) = 36, plus 4 bytes of margin.
/// Every header layer widens the buffer view backwards into this region,
/// so a payload allocated with [`PktBuf::for_payload`] can always be
/// framed without copying.
pub const HEADER_RESERVE: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN + 4;
