//! Image transfer state identity and capture mode.

use core::fmt;

/// Transfer state of the single connection slot.
///
/// Variant order is transfer progress; guards compare with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TransferState {
    Idle = 0,
    Connected = 1,
    CaptureRequested = 2,
    ImageInfoProvided = 3,
    Transmitting = 4,
}

impl TransferState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connected => "CONNECTED",
            Self::CaptureRequested => "CAPTURE_REQUESTED",
            Self::ImageInfoProvided => "IMAGE_INFO_PROVIDED",
            Self::Transmitting => "TRANSMITTING",
        }
    }

    /// A capture session is open (requested, described or streaming).
    pub fn in_capture(self) -> bool {
        self >= Self::CaptureRequested
    }

    /// Image info has been sent; the packet size is now frozen.
    pub fn in_transfer(self) -> bool {
        self >= Self::ImageInfoProvided
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the peer asked for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    None,
    OneShot,
    Continuous,
}
