//! Wire formats of the picture transfer service.
//!
//! ```text
//!   control point (peer → device)   [opcode]
//!   image captured (device → peer)  [0x01][u32 LE size]
//!   abort          (device → peer)  [0x00][reason]
//!   image data     (device → peer)  [u32 LE offset][payload ...]
//! ```

use heapless::Vec;

use super::flow::OFFSET_HEADER_LEN;
use crate::error::TransferError;

// ── Control point ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlCommand {
    OneShotCapture = 1,
    ContinuousCapture = 2,
    CancelCapture = 3,
    DataTransferRequest = 4,
}

impl ControlCommand {
    pub fn decode(bytes: &[u8]) -> Result<Self, TransferError> {
        let [opcode] = bytes else {
            return Err(TransferError::InvalidLength);
        };
        match *opcode {
            1 => Ok(Self::OneShotCapture),
            2 => Ok(Self::ContinuousCapture),
            3 => Ok(Self::CancelCapture),
            4 => Ok(Self::DataTransferRequest),
            other => Err(TransferError::UnsupportedOpcode(other)),
        }
    }

    pub const fn opcode(self) -> u8 {
        self as u8
    }
}

// ── Info events ───────────────────────────────────────────────

const OP_ABORTED: u8 = 0;
const OP_IMAGE_CAPTURED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortReason {
    AbortedByServer = 0,
    AbortedByClient = 1,
}

impl AbortReason {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::AbortedByServer),
            1 => Some(Self::AbortedByClient),
            _ => None,
        }
    }
}

/// Notification on the image info characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoEvent {
    Aborted(AbortReason),
    ImageCaptured { size: u32 },
}

impl InfoEvent {
    pub const MAX_LEN: usize = 5;

    pub fn encode(&self) -> Vec<u8, { Self::MAX_LEN }> {
        let mut out = Vec::new();
        // Capacity is sized for the longest variant; extends cannot fail.
        match *self {
            Self::Aborted(reason) => {
                let _ = out.extend_from_slice(&[OP_ABORTED, reason as u8]);
            }
            Self::ImageCaptured { size } => {
                let _ = out.push(OP_IMAGE_CAPTURED);
                let _ = out.extend_from_slice(&size.to_le_bytes());
            }
        }
        out
    }

    /// Parse an info notification; `None` for anything malformed.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [OP_ABORTED, reason] => AbortReason::from_u8(*reason).map(Self::Aborted),
            [OP_IMAGE_CAPTURED, size @ ..] => {
                let raw: [u8; 4] = size.try_into().ok()?;
                Some(Self::ImageCaptured {
                    size: u32::from_le_bytes(raw),
                })
            }
            _ => None,
        }
    }
}

// ── Image data packets ────────────────────────────────────────

/// A received image data packet, borrowed from the notification bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPacket<'a> {
    pub offset: u32,
    pub payload: &'a [u8],
}

impl<'a> DataPacket<'a> {
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < OFFSET_HEADER_LEN {
            return None;
        }
        let (header, payload) = bytes.split_at(OFFSET_HEADER_LEN);
        let offset = u32::from_le_bytes(header.try_into().ok()?);
        Some(Self { offset, payload })
    }
}

/// Write the offset header into the first four bytes of `packet`.
pub fn write_offset_header(packet: &mut [u8], offset: u32) {
    packet[..OFFSET_HEADER_LEN].copy_from_slice(&offset.to_le_bytes());
}
