//! Hardware MAC abstraction and interrupt classes.
//!
//! The stack never touches memory-mapped registers directly; everything
//! it needs from the hardware is behind the [`MacDevice`] trait:
//! a level-triggered pending-interrupt bitmask, a non-blocking receive
//! that reports the hardware's receive length (clearing any receive
//! error it finds), a transmit-busy flag, and a raw frame transmit.
//!
//! # Interrupt Model
//!
//! The poll loop reads [`MacDevice::pending_irqs`] once per iteration
//! and services each pending class in a fixed priority order (timer,
//! receive, transmit-complete), acknowledging each class as it is
//! handled. Interrupts are level-triggered: an unacknowledged class
//! stays pending in the next iteration.

use crate::buffer::PktBuf;
use crate::ethernet::EthAddr;

// ============================================================================
// Interrupt Classes
// ============================================================================

/// Periodic timer tick.
pub const IRQ_TIMER: u32 = 1 << 0;

/// A frame is waiting in the receive buffer.
pub const IRQ_NET_RX: u32 = 1 << 1;

/// The previous transmit has completed.
pub const IRQ_NET_TX: u32 = 1 << 2;

// ============================================================================
// Errors
// ============================================================================

/// Errors from the receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    /// The hardware reported a receive error. The device implementation
    /// must have cleared the error condition before returning this.
    Hardware,
}

// ============================================================================
// MacDevice
// ============================================================================

/// The hardware Ethernet MAC, as seen by the stack.
///
/// The MAC inserts the source address and CRC on transmit, so frames
/// handed to [`transmit`](MacDevice::transmit) carry only the 8-byte
/// destination + ethertype header in front of the payload.
pub trait MacDevice {
    /// The station address programmed into the MAC.
    fn mac_address(&self) -> EthAddr;

    /// Read the pending-interrupt bitmask ([`IRQ_TIMER`] | [`IRQ_NET_RX`]
    /// | [`IRQ_NET_TX`]).
    fn pending_irqs(&mut self) -> u32;

    /// Acknowledge the interrupt classes in `mask`.
    fn ack_irq(&mut self, mask: u32);

    /// Pull one received frame, sized from the hardware's receive-length
    /// field, consuming the receive slot.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(_))` - a frame was pending
    /// - `Ok(None)` - nothing pending
    /// - `Err(RxError)` - the hardware reported (and cleared) an error
    fn receive(&mut self) -> Result<Option<PktBuf>, RxError>;

    /// Whether the transmitter is still busy with the previous frame.
    fn tx_busy(&self) -> bool;

    /// Hand a complete frame to the transmitter. Only called when
    /// [`tx_busy`](MacDevice::tx_busy) reported false.
    fn transmit(&mut self, frame: &[u8]);
}

// ============================================================================
// Test Device
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    /// Scripted MAC for dispatcher tests: queued receive frames, captured
    /// transmit frames, and directly controllable busy/interrupt state.
    pub(crate) struct TestMac {
        pub mac: EthAddr,
        pub rx_queue: VecDeque<Vec<u8>>,
        pub rx_error: bool,
        pub tx_log: Vec<Vec<u8>>,
        pub busy: bool,
        pub irqs: u32,
    }

    impl TestMac {
        pub fn new(mac: EthAddr) -> Self {
            TestMac {
                mac,
                rx_queue: VecDeque::new(),
                rx_error: false,
                tx_log: Vec::new(),
                busy: false,
                irqs: 0,
            }
        }

        /// Queue a frame and raise the receive interrupt.
        pub fn push_rx(&mut self, frame: &[u8]) {
            self.rx_queue.push_back(frame.to_vec());
            self.irqs |= IRQ_NET_RX;
        }
    }

    impl MacDevice for TestMac {
        fn mac_address(&self) -> EthAddr {
            self.mac
        }

        fn pending_irqs(&mut self) -> u32 {
            self.irqs
        }

        fn ack_irq(&mut self, mask: u32) {
            self.irqs &= !mask;
        }

        fn receive(&mut self) -> Result<Option<PktBuf>, RxError> {
            if self.rx_error {
                self.rx_error = false;
                return Err(RxError::Hardware);
            }
            Ok(self.rx_queue.pop_front().map(|f| PktBuf::from_frame(&f)))
        }

        fn tx_busy(&self) -> bool {
            self.busy
        }

        fn transmit(&mut self, frame: &[u8]) {
            assert!(!self.busy, "transmit while busy");
            self.tx_log.push(frame.to_vec());
        }
    }
}
