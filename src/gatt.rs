//! GATT attribute identities shared by the services.
//!
//! ## Service layout
//!
//! | Characteristic        | UUID                                   | Props          |
//! |-----------------------|----------------------------------------|----------------|
//! | Picture transfer svc  | `00000004-0001-0362-b5da-012dd27485f8` |                |
//! | Control point         | `00000004-0002-…`                      | Write          |
//! | Image info            | `00000004-0003-…`                      | Notify         |
//! | Image data            | `00000004-0004-…`                      | Notify         |
//! | Sensor trigger svc    | `00000005-0001-0362-b5da-012dd27485f8` |                |
//! | Motion trigger        | `00000005-0003-…`                      | Read+Notify    |
//! | Acceleration trigger  | `00000005-0004-…`                      | Read+Notify    |
//! | Temperature trigger   | `00000005-0005-…`                      | Read+Notify    |
//! | Humidity trigger      | `00000005-0006-…`                      | Read+Notify    |
//! | DFU svc               | `00000006-0001-0362-b5da-012dd27485f8` |                |
//! | DFU enter             | `00000006-0002-…`                      | Write          |
//!
//! Each trigger characteristic carries a subscription descriptor, a value
//! trigger setting, a time trigger setting, a presentation format and a
//! user description.

use crate::error::{TransferError, TriggerError};
use crate::triggers::TriggerId;

pub const PICTURE_SERVICE_UUID: u128 = 0x00000004_0001_0362_b5da_012dd27485f8;
pub const CHAR_CONTROL_POINT: u128 = 0x00000004_0002_0362_b5da_012dd27485f8;
pub const CHAR_IMAGE_INFO: u128 = 0x00000004_0003_0362_b5da_012dd27485f8;
pub const CHAR_IMAGE_DATA: u128 = 0x00000004_0004_0362_b5da_012dd27485f8;

pub const TRIGGER_SERVICE_UUID: u128 = 0x00000005_0001_0362_b5da_012dd27485f8;
pub const CHAR_MOTION_TRIGGER: u128 = 0x00000005_0003_0362_b5da_012dd27485f8;
pub const CHAR_ACCELERATION_TRIGGER: u128 = 0x00000005_0004_0362_b5da_012dd27485f8;
pub const CHAR_TEMPERATURE_TRIGGER: u128 = 0x00000005_0005_0362_b5da_012dd27485f8;
pub const CHAR_HUMIDITY_TRIGGER: u128 = 0x00000005_0006_0362_b5da_012dd27485f8;

pub const DFU_SERVICE_UUID: u128 = 0x00000006_0001_0362_b5da_012dd27485f8;
pub const CHAR_DFU_ENTER: u128 = 0x00000006_0002_0362_b5da_012dd27485f8;

// 16-bit descriptor UUIDs.
pub const DESC_USER_DESCRIPTION: u16 = 0x2901;
pub const DESC_SUBSCRIPTION: u16 = 0x2902;
pub const DESC_PRESENTATION_FORMAT: u16 = 0x2904;
pub const DESC_VALUE_TRIGGER_SETTING: u16 = 0x290D;
pub const DESC_TIME_TRIGGER_SETTING: u16 = 0x290E;

/// Characteristics the device sends notifications on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    ImageInfo,
    ImageData,
    TriggerValue(TriggerId),
}

impl Attribute {
    pub const fn uuid(self) -> u128 {
        match self {
            Self::ImageInfo => CHAR_IMAGE_INFO,
            Self::ImageData => CHAR_IMAGE_DATA,
            Self::TriggerValue(TriggerId::Motion) => CHAR_MOTION_TRIGGER,
            Self::TriggerValue(TriggerId::Acceleration) => CHAR_ACCELERATION_TRIGGER,
            Self::TriggerValue(TriggerId::Temperature) => CHAR_TEMPERATURE_TRIGGER,
            Self::TriggerValue(TriggerId::Humidity) => CHAR_HUMIDITY_TRIGGER,
        }
    }
}

/// Every attribute a peer can read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattTarget {
    ControlPoint,
    InfoSubscription,
    DataSubscription,
    TriggerValue(TriggerId),
    TriggerSubscription(TriggerId),
    ValueTriggerSetting(TriggerId),
    TimeTriggerSetting(TriggerId),
    DfuEnter,
}

impl GattTarget {
    /// Whether the attribute accepts reads.
    pub const fn readable(self) -> bool {
        !matches!(self, Self::ControlPoint | Self::DfuEnter)
    }

    /// Whether the attribute accepts writes.
    pub const fn writable(self) -> bool {
        !matches!(self, Self::TriggerValue(_))
    }
}

// ---------------------------------------------------------------------------
// Client characteristic configuration descriptor
// ---------------------------------------------------------------------------

/// Decoded 2-byte subscription descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Off,
    Notify,
}

/// Why a subscription descriptor write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    InvalidLength,
    Unsupported(u16),
}

impl Subscription {
    pub const LEN: usize = 2;

    pub fn decode(bytes: &[u8]) -> Result<Self, SubscriptionError> {
        let raw: [u8; Self::LEN] = bytes
            .try_into()
            .map_err(|_| SubscriptionError::InvalidLength)?;
        match u16::from_le_bytes(raw) {
            0x0000 => Ok(Self::Off),
            0x0001 => Ok(Self::Notify),
            other => Err(SubscriptionError::Unsupported(other)),
        }
    }

    pub const fn encode(self) -> [u8; Self::LEN] {
        match self {
            Self::Off => [0x00, 0x00],
            Self::Notify => [0x01, 0x00],
        }
    }

    pub const fn is_on(self) -> bool {
        matches!(self, Self::Notify)
    }
}

impl From<SubscriptionError> for TransferError {
    fn from(e: SubscriptionError) -> Self {
        match e {
            SubscriptionError::InvalidLength => Self::InvalidLength,
            SubscriptionError::Unsupported(v) => Self::UnsupportedSubscription(v),
        }
    }
}

impl From<SubscriptionError> for TriggerError {
    fn from(e: SubscriptionError) -> Self {
        match e {
            SubscriptionError::InvalidLength => Self::InvalidLength,
            SubscriptionError::Unsupported(v) => Self::UnsupportedSubscription(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_decoding() {
        assert_eq!(Subscription::decode(&[0, 0]), Ok(Subscription::Off));
        assert_eq!(Subscription::decode(&[1, 0]), Ok(Subscription::Notify));
        assert_eq!(
            Subscription::decode(&[2, 0]),
            Err(SubscriptionError::Unsupported(2))
        );
        assert_eq!(
            Subscription::decode(&[1]),
            Err(SubscriptionError::InvalidLength)
        );
        assert_eq!(
            Subscription::decode(&[1, 0, 0]),
            Err(SubscriptionError::InvalidLength)
        );
    }

    #[test]
    fn uuids_share_vendor_base() {
        let base = |u: u128| u & 0x0000_ffff_ffff_ffff_ffff_ffff;
        assert_eq!(base(CHAR_IMAGE_DATA), base(PICTURE_SERVICE_UUID));
        assert_eq!(base(CHAR_DFU_ENTER), base(TRIGGER_SERVICE_UUID));
        assert_eq!(
            Attribute::TriggerValue(TriggerId::Humidity).uuid(),
            CHAR_HUMIDITY_TRIGGER
        );
    }

    #[test]
    fn target_permissions() {
        assert!(!GattTarget::ControlPoint.readable());
        assert!(GattTarget::ControlPoint.writable());
        assert!(GattTarget::TriggerValue(TriggerId::Motion).readable());
        assert!(!GattTarget::TriggerValue(TriggerId::Motion).writable());
        assert!(GattTarget::TimeTriggerSetting(TriggerId::Humidity).readable());
        assert!(!GattTarget::DfuEnter.readable());
    }
}
