//! Outbound application events.
//!
//! The [`CameraService`](super::service::CameraService) emits these through
//! the [`EventSink`](super::ports::EventSink) port. Adapters on the other
//! side decide what to do with them (serial log, diagnostics characteristic).

use crate::transfer::{CaptureMode, TransferState};
use crate::triggers::{TriggerId, TriggerSettings};

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// A peer connected.
    Connected,

    /// The peer went away.
    Disconnected,

    /// The picture transfer engine moved between states.
    TransferStateChanged { from: TransferState, to: TransferState },

    /// The ISP was asked to take a picture.
    CaptureStarted(CaptureMode),

    /// The ISP finished an image of `size` bytes.
    ImageCaptured { size: u32, width: u16, height: u16 },

    /// The capture was aborted by the device (ISP failure, rejected info).
    CaptureFailed,

    /// An image transfer completed.
    TransferStats(TransferStats),

    /// A trigger was enabled, disabled or reconfigured.
    TriggerUpdated {
        id: TriggerId,
        enabled: bool,
        settings: TriggerSettings,
    },

    /// A trigger value notification went out.
    TriggerNotified { id: TriggerId, value: i32 },

    /// The environmental sampling period changed; `None` means stopped.
    EnvSamplingChanged(Option<u32>),

    /// DFU entry was armed.
    DfuArmed,
}

/// Timing of one capture/transfer cycle, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    /// Capture request to ISP ready; 0 when the ISP was already powered.
    pub power_up_ms: u32,
    /// ISP ready to image info.
    pub capture_ms: u32,
    /// Data request to last confirmation.
    pub transfer_ms: u32,
    pub image_size: u32,
    /// Bytes per second over `transfer_ms`.
    pub rate_bps: u32,
}

impl TransferStats {
    /// Rate for `size` bytes over `elapsed_ms`; a zero interval counts as 1 ms.
    pub fn rate(size: u32, elapsed_ms: u32) -> u32 {
        let rate = u64::from(size) * 1000 / u64::from(elapsed_ms.max(1));
        rate.min(u64::from(u32::MAX)) as u32
    }
}
