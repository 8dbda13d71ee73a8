//! DFU-enter control attribute.
//!
//! A single one-byte write arms the bootloader hand-off; the run loop polls
//! [`DfuControl::dfu_requested`] and reboots into the updater once the peer
//! is gone.

use log::{info, warn};

use crate::error::DfuError;

/// Value that arms DFU entry.
pub const DFU_ENTER: u8 = 0x01;

#[derive(Debug, Default)]
pub struct DfuControl {
    requested: bool,
}

impl DfuControl {
    pub const fn new() -> Self {
        Self { requested: false }
    }

    pub fn dfu_requested(&self) -> bool {
        self.requested
    }

    /// Peer write to the DFU control attribute.
    pub fn handle_write(&mut self, bytes: &[u8]) -> Result<(), DfuError> {
        let [value] = bytes else {
            warn!("DFU: write of {} bytes rejected", bytes.len());
            return Err(DfuError::InvalidLength);
        };
        if *value != DFU_ENTER {
            warn!("DFU: unsupported value 0x{:02x}", value);
            return Err(DfuError::UnsupportedValue(*value));
        }
        if !self.requested {
            info!("DFU: entry armed");
        }
        self.requested = true;
        Ok(())
    }
}
