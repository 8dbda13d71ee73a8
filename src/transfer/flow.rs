//! Transport flow controller.
//!
//! Bounds the number of image-data notifications in flight and answers
//! "how many payload bytes may be handed to the transfer engine right now".
//!
//! ```text
//!   max_tx_octets ──┬── link-layer PDU header   2
//!                   ├── L2CAP header            4
//!                   ├── ATT notify header       3
//!                   └── packet data ─┬── offset header 4
//!                                    └── payload
//! ```
//!
//! The budget covers every free in-flight slot, minus the payload already
//! staged in the packet under assembly.

use log::{debug, info};

use super::state::TransferState;
use crate::error::FlowError;

/// Smallest link-layer payload every BLE connection starts with.
pub const MIN_TX_OCTETS: u16 = 27;
/// Largest link-layer payload allowed by data length extension.
pub const MAX_TX_OCTETS: u16 = 251;
/// Image-data notifications that may be unconfirmed at once.
pub const MAX_PENDING: u8 = 5;
/// PDU header + L2CAP header + ATT notification header.
pub const NOTIFY_OVERHEAD: usize = 2 + 4 + 3;
/// Little-endian byte offset leading every image-data packet.
pub const OFFSET_HEADER_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct FlowController {
    max_tx_octets: u16,
    pending: u8,
    staged: usize,
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowController {
    pub const fn new() -> Self {
        Self {
            max_tx_octets: MIN_TX_OCTETS,
            pending: 0,
            staged: 0,
        }
    }

    /// Back to connection defaults: minimum packet size, nothing in flight.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record a new negotiated link-layer payload size.
    ///
    /// Rejected once image info has been sent: offsets already promised to
    /// the peer assume the old packet size. The caller must drop the link.
    pub fn negotiated_size_changed(
        &mut self,
        new_max_octets: u16,
        state: TransferState,
    ) -> Result<(), FlowError> {
        if state.in_transfer() {
            return Err(FlowError::TransferInProgress);
        }
        if !(MIN_TX_OCTETS..=MAX_TX_OCTETS).contains(&new_max_octets) {
            return Err(FlowError::OutOfRange(new_max_octets));
        }
        if new_max_octets != self.max_tx_octets {
            info!(
                "Flow: max_tx_octets {} -> {}",
                self.max_tx_octets, new_max_octets
            );
        }
        self.max_tx_octets = new_max_octets;
        Ok(())
    }

    pub const fn max_tx_octets(&self) -> u16 {
        self.max_tx_octets
    }

    /// Packet data length (offset header + payload) of a full packet.
    pub const fn packet_len(&self) -> usize {
        self.max_tx_octets as usize - NOTIFY_OVERHEAD
    }

    /// Payload bytes carried by a full packet.
    pub const fn payload_per_packet(&self) -> usize {
        self.packet_len() - OFFSET_HEADER_LEN
    }

    pub const fn pending(&self) -> u8 {
        self.pending
    }

    /// Payload bytes staged in the packet under assembly.
    pub const fn staged(&self) -> usize {
        self.staged
    }

    /// Payload bytes that may be accepted right now.
    pub fn max_payload_now(&self) -> usize {
        if self.pending >= MAX_PENDING {
            return 0;
        }
        let free_slots = usize::from(MAX_PENDING - self.pending);
        (free_slots * self.payload_per_packet()).saturating_sub(self.staged)
    }

    /// Account for `n` payload bytes appended to the packet under assembly.
    pub fn stage(&mut self, n: usize) {
        self.staged += n;
        debug_assert!(self.staged <= self.payload_per_packet());
    }

    /// The packet under assembly was handed to the radio.
    pub fn packet_queued(&mut self) {
        debug_assert!(self.pending < MAX_PENDING);
        self.pending = (self.pending + 1).min(MAX_PENDING);
        self.staged = 0;
    }

    /// The radio confirmed one packet. Returns `false` (and changes
    /// nothing) when no packet was in flight.
    pub fn packet_confirmed(&mut self) -> bool {
        if self.pending == 0 {
            debug!("Flow: confirmation with nothing pending ignored");
            return false;
        }
        self.pending -= 1;
        true
    }

    /// Forget every in-flight and staged packet; the packet size is kept.
    pub fn abandon_in_flight(&mut self) {
        self.pending = 0;
        self.staged = 0;
    }
}
