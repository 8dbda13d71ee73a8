//! Picture transfer engine.
//!
//! Drives one connection slot through capture request, image info,
//! streaming and completion/abort, and cuts the image into offset-tagged
//! notification packets paced by the [`FlowController`].
//!
//! ```text
//!             connect                 capture request
//!   ┌──────┐ ───────▶ ┌───────────┐ ─────────────────▶ ┌───────────────────┐
//!   │ Idle │          │ Connected │                    │ CaptureRequested  │◀─┐
//!   └──────┘ ◀─────── └───────────┘ ◀───── abort ───── └───────────────────┘  │
//!        disconnect         ▲                                │ image ready     │
//!                           │ done (one-shot)                ▼                 │
//!                           │                      ┌───────────────────┐       │
//!                           │                      │ ImageInfoProvided │       │
//!                           │                      └───────────────────┘       │
//!                           │                                │ data request    │
//!                           │                                ▼                 │
//!                           │                      ┌───────────────────┐       │
//!                           └───────────────────── │   Transmitting    │ ──────┘
//!                                                  └───────────────────┘ done
//!                                                                     (continuous)
//! ```
//!
//! Every notification is tagged with the current transfer epoch. The epoch
//! moves on each new image, abort and (dis)connect, so confirmations for
//! abandoned packets are recognised and dropped.

pub mod flow;
pub mod protocol;
pub mod state;

use log::{debug, info, warn};

use crate::app::ports::{Radio, TransferDelegate};
use crate::error::{FlowError, TransferError};
use crate::gatt::{Attribute, Subscription};
use flow::{FlowController, MAX_TX_OCTETS, NOTIFY_OVERHEAD, OFFSET_HEADER_LEN};
use protocol::{AbortReason, ControlCommand, InfoEvent, write_offset_header};
pub use state::{CaptureMode, TransferState};

/// Largest packet data length (offset header + payload) at any packet size.
pub const MAX_PACKET_LEN: usize = MAX_TX_OCTETS as usize - NOTIFY_OVERHEAD;

pub struct ImageTransfer {
    state: TransferState,
    mode: CaptureMode,
    flow: FlowController,
    info_subscribed: bool,
    bytes_total: u32,
    /// Payload bytes accepted so far (sent or staged).
    bytes_queued: u32,
    packet: [u8; MAX_PACKET_LEN],
    /// Fill level of `packet`, header included. 0 means no packet open.
    packet_len: usize,
    epoch: u16,
}

impl Default for ImageTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageTransfer {
    pub const fn new() -> Self {
        Self {
            state: TransferState::Idle,
            mode: CaptureMode::None,
            flow: FlowController::new(),
            info_subscribed: false,
            bytes_total: 0,
            bytes_queued: 0,
            packet: [0; MAX_PACKET_LEN],
            packet_len: 0,
            epoch: 0,
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    /// Tag carried by notifications of the current transfer.
    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn bytes_total(&self) -> u32 {
        self.bytes_total
    }

    pub fn bytes_queued(&self) -> u32 {
        self.bytes_queued
    }

    pub fn info_subscribed(&self) -> bool {
        self.info_subscribed
    }

    /// A continuous capture session is open.
    pub fn is_continuous_capture(&self) -> bool {
        self.state.in_capture() && self.mode == CaptureMode::Continuous
    }

    /// Image bytes the producer may push right now.
    ///
    /// Zero outside `Transmitting`; never more than what is left of the image.
    pub fn max_push_size(&self) -> usize {
        if self.state != TransferState::Transmitting {
            return 0;
        }
        let remaining = (self.bytes_total - self.bytes_queued) as usize;
        self.flow.max_payload_now().min(remaining)
    }

    // ── Link events ───────────────────────────────────────────

    pub fn on_connect(&mut self) {
        if self.state != TransferState::Idle {
            warn!("Transfer: connect while {}", self.state);
        }
        self.flow.reset();
        self.info_subscribed = false;
        self.mode = CaptureMode::None;
        self.clear_transfer();
        self.transition(TransferState::Connected);
    }

    /// Drop everything. A peer lost mid-image also cancels the capture so
    /// the producer can release the ISP.
    pub fn on_disconnect(&mut self, delegate: &mut impl TransferDelegate) {
        if self.state.in_transfer() {
            delegate.on_capture_cancelled();
        }
        self.mode = CaptureMode::None;
        self.info_subscribed = false;
        self.clear_transfer();
        self.transition(TransferState::Idle);
    }

    /// Forward a data-length / MTU renegotiation.
    ///
    /// `Err(FlowError::TransferInProgress)` means the caller must terminate
    /// the connection.
    pub fn on_packet_size_changed(&mut self, max_tx_octets: u16) -> Result<(), FlowError> {
        self.flow.negotiated_size_changed(max_tx_octets, self.state)
    }

    // ── Peer writes ───────────────────────────────────────────

    /// Subscription descriptor of the image info characteristic.
    pub fn write_info_subscription(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        let sub = Subscription::decode(bytes)?;
        self.info_subscribed = sub.is_on();
        debug!("Transfer: info notifications {}", if sub.is_on() { "on" } else { "off" });
        Ok(())
    }

    /// Control point write. An error leaves the engine untouched.
    pub fn handle_control_write(
        &mut self,
        bytes: &[u8],
        radio: &mut impl Radio,
        delegate: &mut impl TransferDelegate,
    ) -> Result<(), TransferError> {
        let command = ControlCommand::decode(bytes).inspect_err(|e| {
            warn!("Transfer: control write rejected ({})", e);
        })?;

        match command {
            ControlCommand::OneShotCapture => {
                self.request_capture(CaptureMode::OneShot, delegate)
            }
            ControlCommand::ContinuousCapture => {
                self.request_capture(CaptureMode::Continuous, delegate)
            }
            ControlCommand::CancelCapture => {
                if self.state.in_capture() {
                    self.abort(AbortReason::AbortedByClient, radio)?;
                    delegate.on_capture_cancelled();
                } else {
                    debug!("Transfer: cancel with nothing to cancel");
                }
                Ok(())
            }
            ControlCommand::DataTransferRequest => match self.state {
                TransferState::ImageInfoProvided => {
                    self.transition(TransferState::Transmitting);
                    delegate.on_transfer_requested();
                    Ok(())
                }
                TransferState::Transmitting => Err(TransferError::ProcedureInProgress),
                _ => {
                    warn!("Transfer: data request in {}", self.state);
                    Err(TransferError::TransferNotAllowed)
                }
            },
        }
    }

    fn request_capture(
        &mut self,
        mode: CaptureMode,
        delegate: &mut impl TransferDelegate,
    ) -> Result<(), TransferError> {
        if self.state != TransferState::Connected {
            warn!("Transfer: capture request in {}", self.state);
            return Err(TransferError::ProcedureInProgress);
        }
        if !self.info_subscribed {
            warn!("Transfer: capture request without info notifications");
            return Err(TransferError::NotificationsDisabled);
        }
        self.mode = mode;
        self.transition(TransferState::CaptureRequested);
        delegate.on_capture_requested(mode);
        Ok(())
    }

    // ── Producer API ──────────────────────────────────────────

    /// The producer has an image of `size` bytes ready.
    ///
    /// Announces it to the peer. On error the state is unchanged and the
    /// producer is expected to abort.
    pub fn start_image_transfer(
        &mut self,
        size: u32,
        radio: &mut impl Radio,
    ) -> Result<(), TransferError> {
        if size == 0 {
            return Err(TransferError::InvalidSize);
        }
        if self.state != TransferState::CaptureRequested {
            return Err(TransferError::NotPermitted);
        }

        self.clear_transfer();
        let event = InfoEvent::ImageCaptured { size }.encode();
        radio.notify(Attribute::ImageInfo, self.epoch, &event)?;

        self.bytes_total = size;
        info!("Transfer: image of {} bytes announced", size);
        self.transition(TransferState::ImageInfoProvided);
        Ok(())
    }

    /// Abort the open capture session and tell the peer why.
    ///
    /// Fails only outside a capture session. Once the session is dropped
    /// the abort stands; a failed notification is logged, not returned.
    pub fn abort(&mut self, reason: AbortReason, radio: &mut impl Radio) -> Result<(), TransferError> {
        if !self.state.in_capture() {
            return Err(TransferError::NotPermitted);
        }

        self.clear_transfer();
        self.mode = CaptureMode::None;
        self.transition(TransferState::Connected);

        let event = InfoEvent::Aborted(reason).encode();
        if let Err(e) = radio.notify(Attribute::ImageInfo, self.epoch, &event) {
            warn!("Transfer: abort notification lost ({})", e);
        }
        info!("Transfer: aborted ({:?})", reason);
        Ok(())
    }

    /// Append image bytes; full packets (and the final short one) are sent
    /// as they complete.
    ///
    /// `data` must fit [`max_push_size`](Self::max_push_size); a larger push
    /// is refused whole.
    pub fn push_image_data(
        &mut self,
        data: &[u8],
        radio: &mut impl Radio,
    ) -> Result<(), TransferError> {
        if self.state != TransferState::Transmitting {
            return Err(TransferError::NotPermitted);
        }
        let allowed = self.max_push_size();
        if data.len() > allowed {
            return Err(TransferError::PushTooLarge {
                requested: data.len(),
                allowed,
            });
        }

        let packet_len = self.flow.packet_len();
        let mut rest = data;
        while !rest.is_empty() {
            if self.packet_len == 0 {
                write_offset_header(&mut self.packet, self.bytes_queued);
                self.packet_len = OFFSET_HEADER_LEN;
            }

            let n = rest.len().min(packet_len - self.packet_len);
            self.packet[self.packet_len..self.packet_len + n].copy_from_slice(&rest[..n]);
            self.packet_len += n;
            self.bytes_queued += n as u32;
            self.flow.stage(n);
            rest = &rest[n..];

            if self.packet_len == packet_len {
                self.transmit_packet(radio)?;
            }
        }

        if self.bytes_queued == self.bytes_total && self.packet_len > OFFSET_HEADER_LEN {
            self.transmit_packet(radio)?;
        }
        Ok(())
    }

    fn transmit_packet(&mut self, radio: &mut impl Radio) -> Result<(), TransferError> {
        let len = self.packet_len;
        radio.notify(Attribute::ImageData, self.epoch, &self.packet[..len])?;
        debug!(
            "Transfer: packet offset={} len={} pending={}",
            self.bytes_queued as usize - (len - OFFSET_HEADER_LEN),
            len,
            self.flow.pending() + 1
        );
        self.flow.packet_queued();
        self.packet_len = 0;
        Ok(())
    }

    // ── Radio completion ──────────────────────────────────────

    /// The radio finished sending a notification.
    ///
    /// Only image data confirmations of the current epoch count; anything
    /// else is ignored.
    pub fn on_notification_complete(
        &mut self,
        attribute: Attribute,
        tag: u16,
        delegate: &mut impl TransferDelegate,
    ) {
        if attribute != Attribute::ImageData {
            return;
        }
        if tag != self.epoch || self.state != TransferState::Transmitting {
            debug!("Transfer: stale confirmation (tag {}, epoch {})", tag, self.epoch);
            return;
        }
        if !self.flow.packet_confirmed() {
            return;
        }

        if self.bytes_queued < self.bytes_total {
            delegate.on_space_available();
        } else if self.flow.pending() == 0 {
            let mode = self.mode;
            if mode == CaptureMode::Continuous {
                self.transition(TransferState::CaptureRequested);
            } else {
                self.mode = CaptureMode::None;
                self.transition(TransferState::Connected);
            }
            info!("Transfer: {} bytes delivered", self.bytes_total);
            delegate.on_transfer_done(mode);
        }
    }

    // ── Internals ─────────────────────────────────────────────

    /// Forget the current image and invalidate in-flight confirmations.
    fn clear_transfer(&mut self) {
        self.flow.abandon_in_flight();
        self.bytes_total = 0;
        self.bytes_queued = 0;
        self.packet_len = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn transition(&mut self, next: TransferState) {
        if next != self.state {
            info!("Transfer: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
