//! FFT bulk-transfer session: a positional-acknowledgment protocol over UDP.
//!
//! A host streams 1024 sample words into the device, the hardware FFT
//! transforms them, and the host polls the result back out. Reliability
//! is built from positional ACKs rather than sequence numbers: every
//! frame names a word offset, and both sides converge by re-announcing
//! the offset they are at.
//!
//! # Wire Format (UDP payload, big-endian)
//!
//! ```text
//! +----------------+----------------+------------------------------+
//! | transfer id u16|  position u16  |  up to 128 sample words u32  |
//! +----------------+----------------+------------------------------+
//! ```
//!
//! - Input phase: the host sends data frames at the position the device
//!   last acknowledged; the device loads the words into the FFT engine
//!   and ACKs the new position. A duplicate or out-of-order frame gets
//!   the current position re-ACKed, nothing else.
//! - Output phase (entered when position reaches [`FFT_SIZE`]): the
//!   host's frames become read cursors; the device serves result words
//!   and tracks the cursor as a monotonic high-water mark. A cursor at
//!   `2 * FFT_SIZE` means the host has everything; the session resets
//!   for the next transfer.
//! - A frame with an unknown transfer id or source port abandons the
//!   session in favor of the new one at any time.
//!
//! The session also has a periodic timeout hook: because the device
//! keeps no retransmit timers per packet, it simply re-announces its
//! state (Input) or proactively pushes the next result chunk (Output)
//! whenever the tick fires.

use crate::buffer::PktBuf;
use crate::ipv4::Ipv4Addr;
use crate::FFT_HEADER_LEN;

// ============================================================================
// Constants
// ============================================================================

/// Well-known UDP port of the transfer service.
pub const FFT_PORT: u16 = 6783;

/// Transform size in sample words.
pub const FFT_SIZE: usize = 1024;

/// Maximum sample words per data frame (512 bytes of payload).
pub const FFT_MAX_WORDS: usize = 128;

/// A read cursor at this position means the output is fully drained.
pub const FFT_DRAINED: u32 = 2 * FFT_SIZE as u32;

// ============================================================================
// FftEngine
// ============================================================================

/// The hardware FFT core, as seen by the transfer session.
///
/// During the input phase the session writes sample words into the
/// engine's input array; during the output phase it reads transformed
/// words back out. A control write resets the core to idle between
/// transfers.
pub trait FftEngine {
    /// Reset the core to idle, abandoning any work in flight.
    fn reset(&mut self);

    /// Store one sample word at `index` in the input array.
    ///
    /// `index` is below [`FFT_SIZE`]; the session never writes past the
    /// input region.
    fn write_input(&mut self, index: usize, word: u32);

    /// Read one transformed word at `index` from the output array.
    fn read_output(&self, index: usize) -> u32;

    /// Whether the core has finished transforming the loaded input.
    fn done(&self) -> bool;
}

// ============================================================================
// Session State
// ============================================================================

/// Which direction the transfer is currently moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftPhase {
    /// Accepting sample words from the peer.
    Input,
    /// Serving transformed words to the peer.
    Output,
}

/// The single in-flight transfer session.
///
/// There is no explicit destructor: the session is always "the last
/// transfer seen", and a frame carrying a different transfer id
/// implicitly cancels whatever came before it.
#[derive(Debug)]
pub struct FftSession {
    id: Option<u16>,
    peer_ip: Ipv4Addr,
    peer_port: u16,
    position: u32,
    phase: FftPhase,
}

impl Default for FftSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FftSession {
    /// A session that has never seen a transfer.
    pub fn new() -> Self {
        FftSession {
            id: None,
            peer_ip: Ipv4Addr::UNSPECIFIED,
            peer_port: 0,
            position: 0,
            phase: FftPhase::Input,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> FftPhase {
        self.phase
    }

    /// Current word position: `[0, N)` while loading input, `[N, 2N)`
    /// while draining output.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Id of the transfer in flight, if any has been seen.
    pub fn transfer_id(&self) -> Option<u16> {
        self.id
    }

    /// Peer address and source port of the transfer in flight.
    pub fn peer(&self) -> (Ipv4Addr, u16) {
        (self.peer_ip, self.peer_port)
    }

    /// Handle a frame that arrived on the transfer port.
    ///
    /// `payload` is the UDP payload; `src_ip` and `src_port` identify
    /// the peer. Returns the UDP payload to send back, if any; the
    /// dispatcher addresses it to [`Self::peer`].
    pub fn on_packet<E: FftEngine>(
        &mut self,
        engine: &mut E,
        src_ip: Ipv4Addr,
        src_port: u16,
        payload: &[u8],
    ) -> Option<PktBuf> {
        if payload.len() < FFT_HEADER_LEN {
            log::warn!("fft: runt frame ({} bytes) from {}", payload.len(), src_ip);
            return None;
        }
        let pkt_id = u16::from_be_bytes([payload[0], payload[1]]);
        let pkt_pos = u32::from(u16::from_be_bytes([payload[2], payload[3]]));

        match self.phase {
            FftPhase::Input => self.input_packet(engine, src_ip, src_port, pkt_id, pkt_pos, payload),
            FftPhase::Output => self.output_packet(engine, src_ip, src_port, pkt_id, pkt_pos),
        }
    }

    fn input_packet<E: FftEngine>(
        &mut self,
        engine: &mut E,
        src_ip: Ipv4Addr,
        src_port: u16,
        pkt_id: u16,
        pkt_pos: u32,
        payload: &[u8],
    ) -> Option<PktBuf> {
        let sid = match self.id {
            Some(sid) if sid == pkt_id && self.peer_port == src_port => sid,
            _ => return Some(self.adopt(engine, src_ip, src_port, pkt_id)),
        };

        if src_ip == self.peer_ip && pkt_pos == self.position {
            for word in payload[FFT_HEADER_LEN..].chunks_exact(4) {
                if self.position as usize >= FFT_SIZE {
                    // Input region is N words; excess is ignored
                    break;
                }
                let value = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
                engine.write_input(self.position as usize, value);
                self.position += 1;
            }
            let resp = ack(sid, self.position);
            if self.position as usize == FFT_SIZE {
                log::debug!("fft: transfer #{sid} input complete, serving output");
                self.phase = FftPhase::Output;
            }
            Some(resp)
        } else {
            // Duplicate or out-of-order frame: re-announce where we are so
            // the peer can recover from a lost ACK without resending data
            // we already hold
            Some(ack(sid, self.position))
        }
    }

    fn output_packet<E: FftEngine>(
        &mut self,
        engine: &mut E,
        src_ip: Ipv4Addr,
        src_port: u16,
        pkt_id: u16,
        pkt_pos: u32,
    ) -> Option<PktBuf> {
        let sid = match self.id {
            Some(sid) if sid == pkt_id => sid,
            _ => return Some(self.adopt(engine, src_ip, src_port, pkt_id)),
        };
        if src_ip != self.peer_ip {
            return None;
        }

        if pkt_pos >= FFT_DRAINED {
            log::debug!("fft: transfer #{sid} drained, back to input");
            engine.reset();
            self.phase = FftPhase::Input;
            self.position = 0;
            return None;
        }

        if !engine.done() {
            log::debug!("fft: serving output before engine reports done");
        }
        let count = FFT_SIZE.saturating_sub(pkt_pos as usize).min(FFT_MAX_WORDS);
        let resp = data_frame(engine, sid, pkt_pos as u16, pkt_pos as usize, count);
        if pkt_pos > self.position {
            self.position = pkt_pos;
        }
        Some(resp)
    }

    /// Abandon the current session for a new `(id, peer)` and acknowledge
    /// position zero. The original firmware restarts in the input phase
    /// from both phases, so this does too.
    fn adopt<E: FftEngine>(
        &mut self,
        engine: &mut E,
        src_ip: Ipv4Addr,
        src_port: u16,
        pkt_id: u16,
    ) -> PktBuf {
        log::info!("fft: new transfer #{pkt_id} from {}:{}", src_ip, src_port);
        engine.reset();
        self.id = Some(pkt_id);
        self.peer_ip = src_ip;
        self.peer_port = src_port;
        self.position = 0;
        self.phase = FftPhase::Input;
        ack(pkt_id, 0)
    }

    /// Periodic tick: re-announce state instead of keeping per-packet
    /// retransmit timers.
    ///
    /// In the input phase the current ACK is repeated (covering a lost
    /// ACK on the last data frame); in the output phase the next result
    /// chunk is pushed from the session position.
    pub fn on_timeout<E: FftEngine>(&mut self, engine: &mut E) -> Option<PktBuf> {
        let sid = self.id?;
        match self.phase {
            FftPhase::Input => {
                if self.position == 0 {
                    return None;
                }
                Some(ack(sid, self.position))
            }
            FftPhase::Output => {
                if self.position >= FFT_DRAINED {
                    return None;
                }
                let count = (FFT_DRAINED - self.position).min(FFT_MAX_WORDS as u32) as usize;
                if count == 0 {
                    self.phase = FftPhase::Input;
                    return None;
                }
                let base = (self.position as usize).saturating_sub(FFT_SIZE);
                Some(data_frame(engine, sid, self.position as u16, base, count))
            }
        }
    }
}

// ============================================================================
// Frame Builders
// ============================================================================

/// A 4-byte positional ACK `(id, position)`.
fn ack(id: u16, position: u32) -> PktBuf {
    let mut pkt = PktBuf::for_payload(FFT_HEADER_LEN);
    let body = pkt.as_mut_slice();
    body[0..2].copy_from_slice(&id.to_be_bytes());
    body[2..4].copy_from_slice(&(position as u16).to_be_bytes());
    pkt
}

/// A data frame `(id, position)` carrying `count` output words starting
/// at engine index `base`, each converted to network byte order.
fn data_frame<E: FftEngine>(
    engine: &E,
    id: u16,
    position: u16,
    base: usize,
    count: usize,
) -> PktBuf {
    let mut pkt = PktBuf::for_payload(FFT_HEADER_LEN + count * 4);
    let body = pkt.as_mut_slice();
    body[0..2].copy_from_slice(&id.to_be_bytes());
    body[2..4].copy_from_slice(&position.to_be_bytes());
    for k in 0..count {
        let word = engine.read_output(base + k);
        body[FFT_HEADER_LEN + k * 4..FFT_HEADER_LEN + (k + 1) * 4]
            .copy_from_slice(&word.to_be_bytes());
    }
    pkt
}

// ============================================================================
// Test Engine
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::testing::TestFft;
    use super::*;
    use alloc::vec::Vec;

    const HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 15, 1);
    const HOST_PORT: u16 = 41234;

    fn data(id: u16, position: u16, words: &[u32]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FFT_HEADER_LEN + words.len() * 4);
        frame.extend_from_slice(&id.to_be_bytes());
        frame.extend_from_slice(&position.to_be_bytes());
        for w in words {
            frame.extend_from_slice(&w.to_be_bytes());
        }
        frame
    }

    fn expect_ack(pkt: PktBuf, id: u16, position: u16) {
        let body = pkt.as_slice();
        assert_eq!(body.len(), FFT_HEADER_LEN);
        assert_eq!(u16::from_be_bytes([body[0], body[1]]), id);
        assert_eq!(u16::from_be_bytes([body[2], body[3]]), position);
    }

    /// Drive a full input phase: 1024 words in 8 chunks of 128.
    fn load_input(session: &mut FftSession, engine: &mut TestFft, id: u16, value: u32) {
        for chunk in 0..8u16 {
            let words = [value; FFT_MAX_WORDS];
            let frame = data(id, chunk * FFT_MAX_WORDS as u16, &words);
            let resp = session
                .on_packet(engine, HOST, HOST_PORT, &frame)
                .expect("every input chunk is acknowledged");
            expect_ack(resp, id, (chunk + 1) * FFT_MAX_WORDS as u16);
        }
    }

    #[test]
    fn first_packet_adopts_session() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        let resp = session
            .on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[1, 2, 3]))
            .unwrap();
        // A new transfer resets the engine and ACKs position zero
        expect_ack(resp, 7, 0);
        assert_eq!(engine.resets, 1);
        assert_eq!(session.transfer_id(), Some(7));
        assert_eq!(session.peer(), (HOST, HOST_PORT));
        assert_eq!(session.position(), 0);
    }

    #[test]
    fn sequential_input_fills_and_flips_once() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));

        load_input(&mut session, &mut engine, 7, 0x0102_0304);
        assert_eq!(session.position(), FFT_SIZE as u32);
        assert_eq!(session.phase(), FftPhase::Output);
        assert!(engine.input.iter().all(|&w| w == 0x0102_0304));
    }

    #[test]
    fn duplicate_chunk_reacks_without_advancing() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));

        let words = [5u32; FFT_MAX_WORDS];
        let first = data(7, 0, &words);
        let resp = session
            .on_packet(&mut engine, HOST, HOST_PORT, &first)
            .unwrap();
        expect_ack(resp, 7, FFT_MAX_WORDS as u16);

        // Same chunk again: identical ACK, no position change
        let resp = session
            .on_packet(&mut engine, HOST, HOST_PORT, &first)
            .unwrap();
        expect_ack(resp, 7, FFT_MAX_WORDS as u16);
        assert_eq!(session.position(), FFT_MAX_WORDS as u32);
        assert_eq!(session.phase(), FftPhase::Input);
    }

    #[test]
    fn new_id_mid_input_restarts() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[9; 128]));
        assert_eq!(session.position(), 128);

        let resp = session
            .on_packet(&mut engine, HOST, HOST_PORT, &data(8, 0, &[]))
            .unwrap();
        expect_ack(resp, 8, 0);
        assert_eq!(session.position(), 0);
        assert_eq!(engine.resets, 2);
    }

    #[test]
    fn output_request_serves_first_chunk() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        load_input(&mut session, &mut engine, 7, 0);

        // All-zero input transforms to all zeros (linearity)
        let resp = session
            .on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]))
            .unwrap();
        let body = resp.as_slice();
        assert_eq!(body.len(), FFT_HEADER_LEN + FFT_MAX_WORDS * 4);
        assert_eq!(u16::from_be_bytes([body[0], body[1]]), 7);
        assert_eq!(u16::from_be_bytes([body[2], body[3]]), 0);
        assert!(body[FFT_HEADER_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn output_words_are_big_endian() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        load_input(&mut session, &mut engine, 7, 0xa1b2_c3d4);

        let resp = session
            .on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]))
            .unwrap();
        let body = resp.as_slice();
        assert_eq!(
            &body[FFT_HEADER_LEN..FFT_HEADER_LEN + 4],
            &[0xa1, 0xb2, 0xc3, 0xd4]
        );
    }

    #[test]
    fn output_cursor_is_a_high_water_mark() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        load_input(&mut session, &mut engine, 7, 0);
        assert_eq!(session.position(), 1024);

        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 1152, &[]));
        assert_eq!(session.position(), 1152);
        // A lower cursor does not move the mark backwards
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 1024, &[]));
        assert_eq!(session.position(), 1152);
    }

    #[test]
    fn drained_cursor_resets_to_input() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        load_input(&mut session, &mut engine, 7, 0);
        let resets_before = engine.resets;

        let resp = session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 2048, &[]));
        assert!(resp.is_none());
        assert_eq!(session.phase(), FftPhase::Input);
        assert_eq!(session.position(), 0);
        assert_eq!(engine.resets, resets_before + 1);
    }

    #[test]
    fn new_id_mid_output_restarts_in_input() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        load_input(&mut session, &mut engine, 7, 0);
        assert_eq!(session.phase(), FftPhase::Output);

        let resp = session
            .on_packet(&mut engine, HOST, HOST_PORT, &data(9, 0, &[]))
            .unwrap();
        expect_ack(resp, 9, 0);
        assert_eq!(session.phase(), FftPhase::Input);
        assert_eq!(session.position(), 0);
    }

    #[test]
    fn idle_session_has_no_timeout_traffic() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        assert!(session.on_timeout(&mut engine).is_none());

        // Adopted but no data yet: still nothing to re-announce
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        assert!(session.on_timeout(&mut engine).is_none());
    }

    #[test]
    fn input_timeout_reannounces_position() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[3; 128]));

        let resp = session.on_timeout(&mut engine).unwrap();
        expect_ack(resp, 7, 128);
        assert_eq!(session.position(), 128);
    }

    #[test]
    fn output_timeout_pushes_next_chunk() {
        let mut session = FftSession::new();
        let mut engine = TestFft::new();
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 0, &[]));
        load_input(&mut session, &mut engine, 7, 0x0000_0042);

        // Position is N: the push serves output words starting at zero
        let resp = session.on_timeout(&mut engine).unwrap();
        let body = resp.as_slice();
        assert_eq!(u16::from_be_bytes([body[2], body[3]]), 1024);
        assert_eq!(body.len(), FFT_HEADER_LEN + FFT_MAX_WORDS * 4);
        assert_eq!(
            &body[FFT_HEADER_LEN..FFT_HEADER_LEN + 4],
            &[0x00, 0x00, 0x00, 0x42]
        );

        // After the host advances the cursor, the push follows it
        session.on_packet(&mut engine, HOST, HOST_PORT, &data(7, 1984, &[]));
        let resp = session.on_timeout(&mut engine).unwrap();
        let body = resp.as_slice();
        assert_eq!(u16::from_be_bytes([body[2], body[3]]), 1984);
        assert_eq!(body.len(), FFT_HEADER_LEN + 64 * 4);
    }
}
