//! ARP: hardware address resolution with a small aging cache.
//!
//! # Packet Format (Ethernet/IPv4, 28 bytes)
//!
//! ```text
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! |       Hardware Type (1)       |     Protocol Type (0x0800)    |
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! | HLen=6| PLen=4|            Operation (1=Req, 2=Reply)         |
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! |                  Sender Hardware Address (6 bytes)            |
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! |                  Sender Protocol Address (4 bytes)            |
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! |                  Target Hardware Address (6 bytes)            |
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! |                  Target Protocol Address (4 bytes)            |
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! ```
//!
//! # Cache
//!
//! A fixed table of eight slots, aged by lookup misses rather than by
//! wall-clock time: every miss ages each valid entry by one, and an entry
//! whose age climbs past [`MAX_ENTRY_AGE`] is invalidated. Slot updates
//! follow an invalidate-write-validate discipline so that a lookup
//! running concurrently with an interrupt-driven update can never observe
//! a half-written entry.
//!
//! The default gateway is held outside the table: any destination off the
//! local subnet (or the router itself) resolves to the learned router MAC
//! without consulting the table at all.

use crate::buffer::PktBuf;
use crate::ethernet::EthAddr;
use crate::ipv4::Ipv4Addr;

// ============================================================================
// Constants
// ============================================================================

/// ARP body size for Ethernet/IPv4.
pub const ARP_PACKET_LEN: usize = 28;

/// Fixed prefix of every valid body: hardware type 1 (Ethernet),
/// protocol type 0x0800 (IPv4), address lengths 6 and 4.
const ARP_PREFIX: [u8; 6] = [0x00, 0x01, 0x08, 0x00, 0x06, 0x04];

/// Operation: request.
pub const OPCODE_REQUEST: u16 = 1;

/// Operation: reply.
pub const OPCODE_REPLY: u16 = 2;

/// Number of cache slots.
pub const NUM_ARP_ENTRIES: usize = 8;

/// A valid entry whose age climbs past this many lookup misses is
/// invalidated.
pub const MAX_ENTRY_AGE: u32 = 0x1_0000;

// ============================================================================
// Errors
// ============================================================================

/// Reasons an incoming ARP body is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpError {
    /// Body shorter than 28 bytes.
    Truncated,
    /// The fixed hardware/protocol prefix did not match.
    BadPrefix,
    /// Operation was neither request nor reply.
    UnknownOpcode,
}

// ============================================================================
// Cache
// ============================================================================

/// One slot of the resolution table. Slots are reused, never removed;
/// `valid` is the only liveness marker.
#[derive(Debug, Clone, Copy)]
struct ArpEntry {
    valid: bool,
    ip: Ipv4Addr,
    mac: EthAddr,
    age: u32,
}

const EMPTY_ENTRY: ArpEntry = ArpEntry {
    valid: false,
    ip: Ipv4Addr::UNSPECIFIED,
    mac: EthAddr::ZERO,
    age: 0,
};

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpLookup {
    /// The destination resolved to this MAC.
    Mac(EthAddr),
    /// No mapping yet; the caller must issue a request and drop the
    /// outbound packet that needed the address.
    Pending,
}

/// The fixed-size address resolution cache plus the learned router MAC.
#[derive(Debug)]
pub struct ArpCache {
    entries: [ArpEntry; NUM_ARP_ENTRIES],
    router_mac: Option<EthAddr>,
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ArpCache {
    /// Create an empty cache with no router MAC learned.
    pub fn new() -> Self {
        ArpCache {
            entries: [EMPTY_ENTRY; NUM_ARP_ENTRIES],
            router_mac: None,
        }
    }

    /// The router MAC, once a reply from the router has been seen.
    pub fn router_mac(&self) -> Option<EthAddr> {
        self.router_mac
    }

    /// Number of valid entries (diagnostics).
    pub fn valid_entries(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }

    /// Resolve `ip` to a MAC address.
    ///
    /// Destinations off the local subnet, and the router itself, take the
    /// gateway shortcut: once a router MAC is known they resolve to it
    /// without touching the table. Otherwise an exact table hit resets
    /// that entry's age; a miss ages every valid entry by one (expiring
    /// any that climb past [`MAX_ENTRY_AGE`]) and returns
    /// [`ArpLookup::Pending`], leaving the caller to send a request.
    pub fn lookup(
        &mut self,
        ip: Ipv4Addr,
        our_ip: Ipv4Addr,
        netmask: Ipv4Addr,
        router_ip: Ipv4Addr,
    ) -> ArpLookup {
        if !ip.same_subnet(our_ip, netmask) || ip == router_ip {
            if let Some(mac) = self.router_mac {
                return ArpLookup::Mac(mac);
            }
        }

        if let Some(entry) = self.entries.iter_mut().find(|e| e.valid && e.ip == ip) {
            entry.age = 0;
            return ArpLookup::Mac(entry.mac);
        }

        for entry in self.entries.iter_mut().filter(|e| e.valid) {
            entry.age += 1;
            if entry.age > MAX_ENTRY_AGE {
                entry.valid = false;
            }
        }
        ArpLookup::Pending
    }

    /// Learn a mapping from an ARP reply.
    ///
    /// Our own address is ignored; the router's address sets the router
    /// MAC. Anything else updates the matching slot in place, or claims
    /// the first invalid slot, or evicts the entry with the highest age.
    pub fn insert(
        &mut self,
        ip: Ipv4Addr,
        mac: EthAddr,
        our_ip: Ipv4Addr,
        router_ip: Ipv4Addr,
    ) {
        if ip == our_ip {
            return;
        }
        if ip == router_ip {
            self.router_mac = Some(mac);
            return;
        }

        let slot = match self.entries.iter().position(|e| e.valid && e.ip == ip) {
            Some(i) => i,
            None => self.next_slot(),
        };

        // Invalidate-write-validate: an interrupt-driven lookup must never
        // observe a half-written entry.
        let entry = &mut self.entries[slot];
        entry.valid = false;
        entry.ip = ip;
        entry.mac = mac;
        entry.age = 0;
        entry.valid = true;
    }

    /// Pick the slot for a new mapping: the first invalid one, else the
    /// entry with the highest current age.
    fn next_slot(&self) -> usize {
        let mut eldest = 0;
        let mut oldest_age = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.valid {
                return i;
            }
            if entry.age > oldest_age {
                oldest_age = entry.age;
                eldest = i;
            }
        }
        eldest
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Build a 28-byte ARP request body for `target_ip`.
///
/// The target hardware address is zero; the caller frames the packet to
/// the hardware broadcast address.
pub fn build_request(our_mac: EthAddr, our_ip: Ipv4Addr, target_ip: Ipv4Addr) -> PktBuf {
    build_body(our_mac, our_ip, OPCODE_REQUEST, EthAddr::ZERO, target_ip)
}

/// Build a 28-byte ARP reply body addressed to the requester.
pub fn build_reply(
    our_mac: EthAddr,
    our_ip: Ipv4Addr,
    dst_mac: EthAddr,
    dst_ip: Ipv4Addr,
) -> PktBuf {
    build_body(our_mac, our_ip, OPCODE_REPLY, dst_mac, dst_ip)
}

fn build_body(
    our_mac: EthAddr,
    our_ip: Ipv4Addr,
    opcode: u16,
    target_mac: EthAddr,
    target_ip: Ipv4Addr,
) -> PktBuf {
    let mut pkt = PktBuf::for_payload(ARP_PACKET_LEN);
    let body = pkt.as_mut_slice();
    body[0..6].copy_from_slice(&ARP_PREFIX);
    body[6..8].copy_from_slice(&opcode.to_be_bytes());
    body[8..14].copy_from_slice(&our_mac.0);
    body[14..18].copy_from_slice(&our_ip.0);
    body[18..24].copy_from_slice(&target_mac.0);
    body[24..28].copy_from_slice(&target_ip.0);
    pkt
}

// ============================================================================
// Receive Handling
// ============================================================================

/// What the dispatcher should do with an incoming ARP body.
#[derive(Debug)]
pub enum ArpResult {
    /// A request for our address: send this reply body to `dst`.
    Reply { dst: EthAddr, pkt: PktBuf },
    /// A reply was absorbed into the cache (or was harmless).
    Handled,
    /// The body was malformed and ignored.
    Dropped(ArpError),
}

/// Process an incoming ARP body (the Ethernet payload).
///
/// The fixed prefix is validated first; mismatches are dropped silently.
/// Requests for our address produce a reply body, replies feed the cache.
pub fn process(
    payload: &[u8],
    our_mac: EthAddr,
    our_ip: Ipv4Addr,
    router_ip: Ipv4Addr,
    cache: &mut ArpCache,
) -> ArpResult {
    if payload.len() < ARP_PACKET_LEN {
        return ArpResult::Dropped(ArpError::Truncated);
    }
    if payload[0..6] != ARP_PREFIX {
        return ArpResult::Dropped(ArpError::BadPrefix);
    }

    let mut sender_mac = [0u8; 6];
    sender_mac.copy_from_slice(&payload[8..14]);
    let sender_mac = EthAddr(sender_mac);
    let sender_ip = Ipv4Addr([payload[14], payload[15], payload[16], payload[17]]);

    match u16::from_be_bytes([payload[6], payload[7]]) {
        OPCODE_REQUEST => {
            let reply = build_reply(our_mac, our_ip, sender_mac, sender_ip);
            ArpResult::Reply {
                dst: sender_mac,
                pkt: reply,
            }
        }
        OPCODE_REPLY => {
            log::debug!("arp: learned {} is at {}", sender_ip, sender_mac);
            cache.insert(sender_ip, sender_mac, our_ip, router_ip);
            ArpResult::Handled
        }
        _ => ArpResult::Dropped(ArpError::UnknownOpcode),
    }
}

// ============================================================================
// Tests
// ============================================================================
