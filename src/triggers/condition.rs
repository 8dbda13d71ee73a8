//! Trigger conditions, their descriptor encodings and evaluation.
//!
//! ```text
//!   value trigger setting   [cond] [boundary0: i32 LE]? [boundary1: i32 LE]?
//!                            1, 5 or 9 bytes depending on cond
//!   time trigger setting    [cond] [interval: u24 LE seconds]?
//!                            1 byte for NoTrigger, 4 bytes otherwise
//! ```

use heapless::Vec;

use crate::error::TriggerError;

// ---------------------------------------------------------------------------
// Condition codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueCondition {
    Changed = 0,
    CrossedBoundary = 1,
    OnBoundary = 2,
    ChangedMoreThan = 3,
    MaskCompare = 4,
    CrossedInterval = 5,
    OnInterval = 6,
    NoTrigger = 7,
}

impl ValueCondition {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Changed,
            1 => Self::CrossedBoundary,
            2 => Self::OnBoundary,
            3 => Self::ChangedMoreThan,
            4 => Self::MaskCompare,
            5 => Self::CrossedInterval,
            6 => Self::OnInterval,
            7 => Self::NoTrigger,
            _ => return None,
        })
    }

    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Descriptor length required by this condition.
    pub const fn setting_len(self) -> usize {
        match self {
            Self::Changed | Self::NoTrigger => 1,
            Self::CrossedBoundary | Self::OnBoundary | Self::ChangedMoreThan | Self::MaskCompare => 5,
            Self::CrossedInterval | Self::OnInterval => 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimeCondition {
    NoTrigger = 0,
    Periodic = 1,
    MinInterval = 2,
    OnChangeCount = 3,
}

impl TimeCondition {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::NoTrigger,
            1 => Self::Periodic,
            2 => Self::MinInterval,
            3 => Self::OnChangeCount,
            _ => return None,
        })
    }

    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub const fn setting_len(self) -> usize {
        match self {
            Self::NoTrigger => 1,
            Self::Periodic | Self::MinInterval | Self::OnChangeCount => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Value trigger setting
// ---------------------------------------------------------------------------

pub const VALUE_SETTING_MAX_LEN: usize = 9;
pub const TIME_SETTING_MAX_LEN: usize = 4;

/// Decoded value trigger setting with its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueTrigger {
    Changed,
    CrossedBoundary(i32),
    OnBoundary(i32),
    ChangedMoreThan(i32),
    MaskCompare(i32),
    CrossedInterval(i32, i32),
    OnInterval(i32, i32),
    #[default]
    NoTrigger,
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// `old -> new` moved across `boundary`, in either direction.
pub fn crossed(old: i32, new: i32, boundary: i32) -> bool {
    (old <= boundary && new > boundary) || (old >= boundary && new < boundary)
}

impl ValueTrigger {
    pub fn condition(&self) -> ValueCondition {
        match self {
            Self::Changed => ValueCondition::Changed,
            Self::CrossedBoundary(_) => ValueCondition::CrossedBoundary,
            Self::OnBoundary(_) => ValueCondition::OnBoundary,
            Self::ChangedMoreThan(_) => ValueCondition::ChangedMoreThan,
            Self::MaskCompare(_) => ValueCondition::MaskCompare,
            Self::CrossedInterval(..) => ValueCondition::CrossedInterval,
            Self::OnInterval(..) => ValueCondition::OnInterval,
            Self::NoTrigger => ValueCondition::NoTrigger,
        }
    }

    /// Both boundary operands; unused slots read as 0.
    pub fn boundaries(&self) -> [i32; 2] {
        match *self {
            Self::CrossedBoundary(b)
            | Self::OnBoundary(b)
            | Self::ChangedMoreThan(b)
            | Self::MaskCompare(b) => [b, 0],
            Self::CrossedInterval(lo, hi) | Self::OnInterval(lo, hi) => [lo, hi],
            Self::Changed | Self::NoTrigger => [0, 0],
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TriggerError> {
        let code = *bytes.first().ok_or(TriggerError::InvalidLength)?;
        let condition = ValueCondition::from_u8(code).ok_or(TriggerError::UnknownCondition(code))?;
        if bytes.len() != condition.setting_len() {
            return Err(TriggerError::InvalidLength);
        }
        Ok(match condition {
            ValueCondition::Changed => Self::Changed,
            ValueCondition::NoTrigger => Self::NoTrigger,
            ValueCondition::CrossedBoundary => Self::CrossedBoundary(read_i32(bytes, 1)),
            ValueCondition::OnBoundary => Self::OnBoundary(read_i32(bytes, 1)),
            ValueCondition::ChangedMoreThan => Self::ChangedMoreThan(read_i32(bytes, 1)),
            ValueCondition::MaskCompare => Self::MaskCompare(read_i32(bytes, 1)),
            ValueCondition::CrossedInterval => {
                Self::CrossedInterval(read_i32(bytes, 1), read_i32(bytes, 5))
            }
            ValueCondition::OnInterval => Self::OnInterval(read_i32(bytes, 1), read_i32(bytes, 5)),
        })
    }

    pub fn encode(&self) -> Vec<u8, VALUE_SETTING_MAX_LEN> {
        let mut out = Vec::new();
        let condition = self.condition();
        let [b0, b1] = self.boundaries();
        // Capacity covers the longest (interval) form.
        let _ = out.push(condition as u8);
        if condition.setting_len() >= 5 {
            let _ = out.extend_from_slice(&b0.to_le_bytes());
        }
        if condition.setting_len() == 9 {
            let _ = out.extend_from_slice(&b1.to_le_bytes());
        }
        out
    }

    /// Does the step `old -> new` satisfy the condition?
    pub fn is_met(&self, old: i32, new: i32) -> bool {
        match *self {
            Self::Changed => new != old,
            Self::OnBoundary(b) => new == b,
            Self::CrossedBoundary(b) | Self::ChangedMoreThan(b) => crossed(old, new, b),
            Self::CrossedInterval(lo, hi) => crossed(old, new, lo) || crossed(old, new, hi),
            Self::OnInterval(lo, hi) => new == lo || new == hi,
            Self::MaskCompare(mask) => (old ^ new) & mask != 0,
            Self::NoTrigger => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Time trigger setting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeTrigger {
    #[default]
    NoTrigger,
    Periodic { secs: u32 },
    MinInterval { secs: u32 },
    OnChangeCount { count: u32 },
}

impl TimeTrigger {
    pub fn condition(&self) -> TimeCondition {
        match self {
            Self::NoTrigger => TimeCondition::NoTrigger,
            Self::Periodic { .. } => TimeCondition::Periodic,
            Self::MinInterval { .. } => TimeCondition::MinInterval,
            Self::OnChangeCount { .. } => TimeCondition::OnChangeCount,
        }
    }

    /// Interval in milliseconds for the timed conditions, else 0.
    pub fn interval_ms(&self) -> u32 {
        match *self {
            Self::Periodic { secs } | Self::MinInterval { secs } => secs.saturating_mul(1000),
            Self::NoTrigger | Self::OnChangeCount { .. } => 0,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TriggerError> {
        let code = *bytes.first().ok_or(TriggerError::InvalidLength)?;
        let condition = TimeCondition::from_u8(code).ok_or(TriggerError::UnknownCondition(code))?;
        if bytes.len() != condition.setting_len() {
            return Err(TriggerError::InvalidLength);
        }
        let operand = || u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0]);
        Ok(match condition {
            TimeCondition::NoTrigger => Self::NoTrigger,
            TimeCondition::Periodic => Self::Periodic { secs: operand() },
            TimeCondition::MinInterval => Self::MinInterval { secs: operand() },
            TimeCondition::OnChangeCount => Self::OnChangeCount { count: operand() },
        })
    }

    pub fn encode(&self) -> Vec<u8, TIME_SETTING_MAX_LEN> {
        let mut out = Vec::new();
        let _ = out.push(self.condition() as u8);
        let operand = match *self {
            Self::NoTrigger => None,
            Self::Periodic { secs } | Self::MinInterval { secs } => Some(secs),
            Self::OnChangeCount { count } => Some(count),
        };
        if let Some(v) = operand {
            let _ = out.extend_from_slice(&v.to_le_bytes()[..3]);
        }
        out
    }

    /// May a notification go out `since_last_ms` after the previous one?
    pub fn permits(&self, since_last_ms: u32) -> bool {
        match *self {
            Self::NoTrigger => true,
            Self::MinInterval { .. } => since_last_ms >= self.interval_ms(),
            Self::Periodic { .. } | Self::OnChangeCount { .. } => false,
        }
    }
}
