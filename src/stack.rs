//! The dispatcher: poll loop, receive demultiplexing, transmit assembly.
//!
//! Every piece of mutable protocol state lives here, in one [`Stack`]
//! context object: the network configuration, the ARP cache, the FFT
//! transfer session, the single deferred-transmit slot, and the
//! statistics counters. The protocol modules below this one are pure
//! encode/decode functions; the dispatcher owns the call graph between
//! them, so no layer ever calls back upward.
//!
//! # Control Flow
//!
//! One [`Stack::poll`] call services one iteration of the device's main
//! loop: it reads the level-triggered pending-interrupt bitmask once and
//! handles each pending class in fixed priority order — timer tick,
//! received frame, transmit complete. Nothing blocks; any operation that
//! must wait for the peer or the hardware simply returns, to be resumed
//! by a later poll.
//!
//! # Deferred Transmission
//!
//! The hardware can hold one outbound frame. When the transmitter is
//! busy, the frame that could not be sent is parked in the pending slot;
//! the transmit-complete interrupt flushes it. A second frame arriving
//! while one is parked replaces it — last writer wins. The slot is a
//! single buffer by design, not a queue.

use crate::arp::{self, ArpCache, ArpLookup, ArpResult};
use crate::buffer::PktBuf;
use crate::device::{MacDevice, IRQ_NET_RX, IRQ_NET_TX, IRQ_TIMER};
use crate::ethernet::{self, EthAddr, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::fft::{FftEngine, FftSession, FFT_PORT};
use crate::icmp::{self, ICMP_ECHO_REQUEST, PING_ID_STRIDE};
use crate::ipv4::{self, Ipv4Addr, IP_ID_STRIDE, PROTO_ICMP, PROTO_UDP, TX_MIN_SLACK};
use crate::udp;

// ============================================================================
// Timing
// ============================================================================

// The hardware timer fires at 10 Hz.

/// Ticks between host liveness pings (20 s).
pub const PING_INTERVAL_TICKS: u32 = 200;

/// Ticks between FFT session timeout handling (500 ms).
pub const FFT_TIMEOUT_TICKS: u32 = 5;

/// Ticks between heartbeat log lines (5 min).
pub const HEARTBEAT_TICKS: u32 = 3000;

// ============================================================================
// Configuration
// ============================================================================

/// Static network identity of the device.
///
/// The addresses are fixed at build time; adjust them for the network
/// the board lives on.
#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
    /// Station MAC address (locally administered).
    pub mac: EthAddr,
    /// Our IP address.
    pub ip: Ipv4Addr,
    /// Local subnet mask.
    pub netmask: Ipv4Addr,
    /// Default gateway; also the host that receives liveness pings.
    pub router_ip: Ipv4Addr,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            mac: EthAddr::new(0x02, 0x15, 0x5f, 0x01, 0x00, 0x16),
            ip: Ipv4Addr::new(192, 168, 15, 22),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            router_ip: Ipv4Addr::new(192, 168, 15, 1),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Event counters kept by the dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetStats {
    /// Frames pulled from the hardware.
    pub rx_frames: u64,
    /// ARP bodies received.
    pub rx_arp: u64,
    /// IPv4 packets received.
    pub rx_ipv4: u64,
    /// ICMP messages addressed to us.
    pub rx_icmp: u64,
    /// UDP datagrams addressed to us.
    pub rx_udp: u64,
    /// Frames handed to the FFT session.
    pub rx_fft: u64,
    /// Hardware receive errors (cleared at the device).
    pub rx_errors: u64,
    /// Malformed or unsupported traffic released without action.
    pub rx_dropped: u64,
    /// Frames handed to the transmitter.
    pub tx_frames: u64,
    /// Frames parked in the pending slot because the transmitter was busy.
    pub tx_deferred: u64,
    /// Parked frames replaced by a newer one (last writer wins).
    pub tx_collisions: u64,
    /// Outbound packets dropped for insufficient header room.
    pub tx_dropped: u64,
    /// Outbound packets dropped awaiting address resolution.
    pub tx_unresolved: u64,
    /// ARP requests issued.
    pub arp_requests: u64,
    /// Echo requests sent.
    pub pings_sent: u64,
}

// ============================================================================
// Stack
// ============================================================================

/// The protocol stack context: one per device.
pub struct Stack<M: MacDevice, F: FftEngine> {
    device: M,
    engine: F,
    cfg: NetConfig,
    arp: ArpCache,
    fft: FftSession,
    pending_tx: Option<PktBuf>,
    stats: NetStats,
    ip_id: u16,
    ping_id: u32,
    ticks: u32,
    last_ping: u32,
    last_fft: u32,
    last_heartbeat: u32,
}

impl<M: MacDevice, F: FftEngine> Stack<M, F> {
    /// Build a stack over the given hardware.
    pub fn new(device: M, engine: F, cfg: NetConfig) -> Self {
        Stack {
            device,
            engine,
            cfg,
            arp: ArpCache::new(),
            fft: FftSession::new(),
            pending_tx: None,
            stats: NetStats::default(),
            ip_id: 0,
            ping_id: 0,
            ticks: 0,
            last_ping: 0,
            last_fft: 0,
            last_heartbeat: 0,
        }
    }

    /// The static network configuration.
    pub fn config(&self) -> &NetConfig {
        &self.cfg
    }

    /// Dispatcher statistics.
    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    /// The ARP cache.
    pub fn arp(&self) -> &ArpCache {
        &self.arp
    }

    /// The FFT transfer session.
    pub fn fft(&self) -> &FftSession {
        &self.fft
    }

    /// The hardware MAC.
    pub fn device(&self) -> &M {
        &self.device
    }

    /// Mutable access to the hardware MAC.
    pub fn device_mut(&mut self) -> &mut M {
        &mut self.device
    }

    /// Announce startup and ping the host once, before the first poll.
    pub fn start(&mut self) {
        log::info!("fftnet up: {} ({})", self.cfg.ip, self.cfg.mac);
        self.send_ping(self.cfg.router_ip);
    }

    // ========================================================================
    // Poll Loop
    // ========================================================================

    /// Service one iteration of the main loop.
    ///
    /// Reads the pending-interrupt bitmask once and handles each pending
    /// class in fixed priority order: timer, receive, transmit-complete.
    pub fn poll(&mut self) {
        let pic = self.device.pending_irqs();

        if pic & IRQ_TIMER != 0 {
            self.on_tick();
            self.device.ack_irq(IRQ_TIMER);
        }

        if pic & IRQ_NET_RX != 0 {
            let received = self.device.receive();
            self.device.ack_irq(IRQ_NET_RX);
            match received {
                Ok(Some(pkt)) => self.handle_frame(pkt),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("net: receive error {e:?}");
                    self.stats.rx_errors += 1;
                }
            }
        }

        if pic & IRQ_NET_TX != 0 {
            if let Some(pkt) = self.pending_tx.take() {
                log::debug!("tx: flushing deferred frame");
                self.transmit_or_defer(pkt);
            }
            self.device.ack_irq(IRQ_NET_TX);
        }
    }

    /// Handle one timer tick.
    ///
    /// Liveness pings and FFT timeout handling both yield to a parked
    /// outbound frame; they run on the next tick that finds the slot
    /// empty.
    fn on_tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);

        if self.ticks.wrapping_sub(self.last_ping) >= PING_INTERVAL_TICKS
            && self.pending_tx.is_none()
        {
            self.send_ping(self.cfg.router_ip);
            self.last_ping = self.ticks;
        }

        if self.ticks.wrapping_sub(self.last_fft) >= FFT_TIMEOUT_TICKS
            && self.pending_tx.is_none()
        {
            if let Some(resp) = self.fft.on_timeout(&mut self.engine) {
                let (peer_ip, peer_port) = self.fft.peer();
                self.transmit_udp(resp, peer_ip, FFT_PORT, peer_port);
            }
            self.last_fft = self.ticks;
        }

        if self.ticks.wrapping_sub(self.last_heartbeat) >= HEARTBEAT_TICKS {
            log::info!("heartbeat: {} ticks since startup", self.ticks);
            self.last_heartbeat = self.ticks;
        }
    }

    // ========================================================================
    // Receive Path
    // ========================================================================

    /// Demultiplex one received frame down the stack.
    fn handle_frame(&mut self, mut pkt: PktBuf) {
        self.stats.rx_frames += 1;

        match ethernet::ethertype(&pkt) {
            Some(ETHERTYPE_ARP) => {
                self.stats.rx_arp += 1;
                if ethernet::deframe(&mut pkt).is_err() {
                    self.stats.rx_dropped += 1;
                    return;
                }
                self.handle_arp(&pkt);
            }
            Some(ETHERTYPE_IPV4) => {
                self.stats.rx_ipv4 += 1;
                self.handle_ipv4(pkt);
            }
            Some(other) => {
                log::warn!("eth: unknown ethertype {other:#06x}");
                ethernet::dump(&mut pkt);
                self.stats.rx_dropped += 1;
            }
            None => {
                log::debug!("eth: runt frame, {} bytes", pkt.len());
                self.stats.rx_dropped += 1;
            }
        }
    }

    fn handle_arp(&mut self, pkt: &PktBuf) {
        match arp::process(
            pkt.as_slice(),
            self.cfg.mac,
            self.cfg.ip,
            self.cfg.router_ip,
            &mut self.arp,
        ) {
            ArpResult::Reply { dst, pkt: reply } => {
                self.transmit_eth(reply, ETHERTYPE_ARP, dst);
            }
            ArpResult::Handled => {}
            ArpResult::Dropped(e) => {
                log::debug!("arp: ignoring packet: {e:?}");
                self.stats.rx_dropped += 1;
            }
        }
    }

    fn handle_ipv4(&mut self, mut pkt: PktBuf) {
        if ethernet::deframe(&mut pkt).is_err() {
            self.stats.rx_dropped += 1;
            return;
        }
        let header = (
            ipv4::src(&pkt),
            ipv4::dst(&pkt),
            ipv4::protocol(&pkt),
        );
        let (src, dst, proto) = match header {
            (Ok(s), Ok(d), Ok(p)) => (s, d, p),
            _ => {
                self.stats.rx_dropped += 1;
                return;
            }
        };
        if ipv4::deframe(&mut pkt).is_err() {
            self.stats.rx_dropped += 1;
            return;
        }

        // Not addressed to us: release without reply
        if dst != self.cfg.ip {
            return;
        }

        match proto {
            PROTO_ICMP => {
                self.stats.rx_icmp += 1;
                self.handle_icmp(src, &pkt);
            }
            PROTO_UDP => {
                self.stats.rx_udp += 1;
                self.handle_udp(src, pkt);
            }
            other => {
                log::warn!("ip: unknown sub-protocol {other}");
                ethernet::dump(&mut pkt);
                self.stats.rx_dropped += 1;
            }
        }
    }

    fn handle_icmp(&mut self, src: Ipv4Addr, pkt: &PktBuf) {
        // Only echo requests are answered; other ICMP types are ignored
        if pkt.as_slice().first() != Some(&ICMP_ECHO_REQUEST) {
            return;
        }
        match icmp::build_echo_reply(pkt.as_slice()) {
            Ok(reply) => self.transmit_ip(reply, PROTO_ICMP, src),
            Err(e) => {
                log::warn!("icmp: not replying to {src}: {e:?}");
                self.stats.rx_dropped += 1;
            }
        }
    }

    fn handle_udp(&mut self, src: Ipv4Addr, mut pkt: PktBuf) {
        let ports = (udp::src_port(&pkt), udp::dst_port(&pkt));
        let (sport, dport) = match ports {
            (Ok(s), Ok(d)) => (s, d),
            _ => {
                self.stats.rx_dropped += 1;
                return;
            }
        };
        if dport != FFT_PORT {
            log::debug!("udp: no listener on port {dport}");
            self.stats.rx_dropped += 1;
            return;
        }
        if udp::deframe(&mut pkt).is_err() {
            self.stats.rx_dropped += 1;
            return;
        }

        self.stats.rx_fft += 1;
        if let Some(resp) = self.fft.on_packet(&mut self.engine, src, sport, pkt.as_slice()) {
            let (peer_ip, peer_port) = self.fft.peer();
            self.transmit_udp(resp, peer_ip, FFT_PORT, peer_port);
        }
    }

    // ========================================================================
    // Transmit Path
    // ========================================================================

    /// Send an ICMP echo request to `dst`.
    pub fn send_ping(&mut self, dst: Ipv4Addr) {
        self.ping_id = self.ping_id.wrapping_add(PING_ID_STRIDE);
        let pkt = icmp::build_echo_request(self.ping_id);
        self.stats.pings_sent += 1;
        self.transmit_ip(pkt, PROTO_ICMP, dst);
    }

    /// Wrap `pkt` in a UDP header and send it to `dst`.
    pub fn transmit_udp(&mut self, mut pkt: PktBuf, dst: Ipv4Addr, src_port: u16, dst_port: u16) {
        if udp::build_header(&mut pkt, src_port, dst_port).is_err() {
            log::warn!("udp: no header room, dropping packet to {dst}");
            self.stats.tx_dropped += 1;
            return;
        }
        self.transmit_ip(pkt, PROTO_UDP, dst);
    }

    /// Wrap `pkt` in an IPv4 header, resolve the destination, and send.
    ///
    /// The packet must still have more than [`TX_MIN_SLACK`] bytes of
    /// leading slack for the IP and Ethernet headers. An unresolved
    /// destination drops the packet while the ARP request goes out; the
    /// caller's next attempt finds the cache warm.
    pub fn transmit_ip(&mut self, mut pkt: PktBuf, proto: u8, dst: Ipv4Addr) {
        if pkt.headroom() < TX_MIN_SLACK {
            log::warn!(
                "ip: {} bytes of header room left, need {}; dropping",
                pkt.headroom(),
                TX_MIN_SLACK
            );
            self.stats.tx_dropped += 1;
            return;
        }
        self.ip_id = self.ip_id.wrapping_add(IP_ID_STRIDE);
        if ipv4::build_header(&mut pkt, proto, self.cfg.ip, dst, self.ip_id).is_err() {
            self.stats.tx_dropped += 1;
            return;
        }

        match self
            .arp
            .lookup(dst, self.cfg.ip, self.cfg.netmask, self.cfg.router_ip)
        {
            ArpLookup::Mac(mac) => self.transmit_eth(pkt, ETHERTYPE_IPV4, mac),
            ArpLookup::Pending => {
                log::debug!("ip: no mapping for {dst} yet, dropping packet");
                self.stats.tx_unresolved += 1;
                self.send_arp_request(dst);
            }
        }
    }

    /// Broadcast an ARP request for `ip`.
    fn send_arp_request(&mut self, ip: Ipv4Addr) {
        let pkt = arp::build_request(self.cfg.mac, self.cfg.ip, ip);
        self.stats.arp_requests += 1;
        self.transmit_eth(pkt, ETHERTYPE_ARP, EthAddr::BROADCAST);
    }

    /// Frame `pkt` for Ethernet and hand it to the transmitter.
    fn transmit_eth(&mut self, mut pkt: PktBuf, ethertype: u16, dst: EthAddr) {
        if ethernet::frame(&mut pkt, ethertype, dst).is_err() {
            log::warn!("eth: no header room, dropping frame to {dst}");
            self.stats.tx_dropped += 1;
            return;
        }
        self.transmit_or_defer(pkt);
    }

    /// Transmit now, or park the frame if the hardware is busy.
    ///
    /// At most one frame is parked; a newer frame replaces an older one.
    fn transmit_or_defer(&mut self, pkt: PktBuf) {
        if self.device.tx_busy() {
            if self.pending_tx.is_some() {
                log::warn!("tx: busy collision, replacing deferred frame");
                self.stats.tx_collisions += 1;
            }
            self.stats.tx_deferred += 1;
            self.pending_tx = Some(pkt);
            return;
        }
        self.device.transmit(pkt.as_slice());
        self.stats.tx_frames += 1;
    }
}

// ============================================================================
// Tests
// ============================================================================
