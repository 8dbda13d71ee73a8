//! Fixed per-trigger data: identity, supported conditions and the GATT
//! presentation metadata of each trigger characteristic.

use super::condition::{TimeCondition, ValueCondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TriggerId {
    Motion = 0,
    Acceleration = 1,
    Temperature = 2,
    Humidity = 3,
}

impl TriggerId {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Motion,
        Self::Acceleration,
        Self::Temperature,
        Self::Humidity,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::Acceleration => "acceleration",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }

    /// Characteristic user description.
    pub const fn user_description(self) -> &'static str {
        match self {
            Self::Motion => "Motion Trigger",
            Self::Acceleration => "Acceleration Trigger",
            Self::Temperature => "Temperature Trigger",
            Self::Humidity => "Humidity Trigger",
        }
    }

    /// Value conditions this trigger accepts, one bit per condition code.
    pub const fn value_conditions(self) -> u8 {
        match self {
            Self::Motion | Self::Acceleration => {
                ValueCondition::Changed.bit()
                    | ValueCondition::OnBoundary.bit()
                    | ValueCondition::NoTrigger.bit()
            }
            Self::Temperature | Self::Humidity => {
                ValueCondition::Changed.bit()
                    | ValueCondition::CrossedBoundary.bit()
                    | ValueCondition::CrossedInterval.bit()
                    | ValueCondition::NoTrigger.bit()
            }
        }
    }

    /// Time conditions this trigger accepts, one bit per condition code.
    pub const fn time_conditions(self) -> u8 {
        TimeCondition::NoTrigger.bit() | TimeCondition::MinInterval.bit()
    }

    pub const fn supports_value(self, condition: ValueCondition) -> bool {
        self.value_conditions() & condition.bit() != 0
    }

    pub const fn supports_time(self, condition: TimeCondition) -> bool {
        self.time_conditions() & condition.bit() != 0
    }

    pub const fn presentation_format(self) -> PresentationFormat {
        match self {
            Self::Motion | Self::Acceleration => PresentationFormat {
                format: FORMAT_BOOLEAN,
                exponent: 0,
                unit: UNIT_UNITLESS,
                namespace: NAMESPACE_BLUETOOTH_SIG,
                description: self as u16 + 1,
            },
            Self::Temperature => PresentationFormat {
                format: FORMAT_SINT32,
                exponent: -2,
                unit: UNIT_CELSIUS,
                namespace: NAMESPACE_BLUETOOTH_SIG,
                description: 3,
            },
            Self::Humidity => PresentationFormat {
                format: FORMAT_SINT32,
                exponent: -2,
                unit: UNIT_PERCENTAGE,
                namespace: NAMESPACE_BLUETOOTH_SIG,
                description: 4,
            },
        }
    }
}

// ── Characteristic presentation format descriptor ─────────────

pub const FORMAT_BOOLEAN: u8 = 0x01;
pub const FORMAT_SINT32: u8 = 0x10;
pub const UNIT_UNITLESS: u16 = 0x2700;
pub const UNIT_CELSIUS: u16 = 0x272F;
pub const UNIT_PERCENTAGE: u16 = 0x27AD;
pub const NAMESPACE_BLUETOOTH_SIG: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationFormat {
    pub format: u8,
    pub exponent: i8,
    pub unit: u16,
    pub namespace: u8,
    pub description: u16,
}

impl PresentationFormat {
    pub const LEN: usize = 7;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let unit = self.unit.to_le_bytes();
        let desc = self.description.to_le_bytes();
        [
            self.format,
            self.exponent as u8,
            unit[0],
            unit[1],
            self.namespace,
            desc[0],
            desc[1],
        ]
    }
}
