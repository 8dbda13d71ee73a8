//! Sensor trigger engine.
//!
//! One [`TriggerSlot`] per sensor. Each pushed sample is compared with the
//! previous one against the slot's value condition; a qualifying change is
//! then throttled by the time condition before a notification goes out.
//!
//! ```text
//!   push_value(new) ──▶ enabled? ──▶ value condition(old,new)? ──▶ time gate? ──▶ notify
//!                          │ no              │ no                     │ no
//!                          ▼                 ▼                        ▼
//!                        (store)           (store)          (store; deferred if
//!                                                            retries are enabled)
//! ```
//!
//! Enabling a trigger is what powers up the physical sensor behind it, so
//! every enable/disable and every settings change on an enabled trigger is
//! reported through [`TriggerDelegate::on_trigger_updated`].

pub mod catalog;
pub mod condition;

use heapless::Vec;
use log::{debug, info, warn};

use crate::app::ports::{Radio, TriggerDelegate};
use crate::error::{RadioError, TriggerError};
use crate::gatt::{Attribute, Subscription};
pub use catalog::TriggerId;
use condition::{TIME_SETTING_MAX_LEN, TimeCondition, TimeTrigger, VALUE_SETTING_MAX_LEN, ValueCondition, ValueTrigger};

/// Length of every trigger value: i32 little-endian.
pub const VALUE_LEN: usize = 4;

/// Snapshot of a trigger's configuration for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSettings {
    pub value_condition: ValueCondition,
    pub boundaries: [i32; 2],
    pub time_condition: TimeCondition,
    /// Interval of a `Periodic`/`MinInterval` time condition, else 0.
    pub time_interval_ms: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerSlot {
    value_trigger: ValueTrigger,
    time_trigger: TimeTrigger,
    enabled: bool,
    notify_pending: bool,
    /// A qualifying change was held back by the time gate.
    deferred: bool,
    last_notify_ms: u32,
    value: i32,
}

pub struct TriggerEngine {
    slots: [TriggerSlot; TriggerId::COUNT],
    retry_deferred: bool,
}

impl Default for TriggerEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TriggerEngine {
    /// `retry_deferred` makes [`poll`](Self::poll) send notifications the
    /// time gate held back; when `false` they are dropped.
    pub fn new(retry_deferred: bool) -> Self {
        Self {
            slots: core::array::from_fn(|_| TriggerSlot::default()),
            retry_deferred,
        }
    }

    fn slot(&self, id: TriggerId) -> &TriggerSlot {
        &self.slots[id.index()]
    }

    fn slot_mut(&mut self, id: TriggerId) -> &mut TriggerSlot {
        &mut self.slots[id.index()]
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn is_enabled(&self, id: TriggerId) -> bool {
        self.slot(id).enabled
    }

    /// Last pushed sample.
    pub fn value(&self, id: TriggerId) -> i32 {
        self.slot(id).value
    }

    pub fn is_deferred(&self, id: TriggerId) -> bool {
        self.slot(id).deferred
    }

    pub fn settings(&self, id: TriggerId) -> TriggerSettings {
        let slot = self.slot(id);
        TriggerSettings {
            value_condition: slot.value_trigger.condition(),
            boundaries: slot.value_trigger.boundaries(),
            time_condition: slot.time_trigger.condition(),
            time_interval_ms: slot.time_trigger.interval_ms(),
        }
    }

    // ── Enable / disable ──────────────────────────────────────

    /// Turn a trigger on or off.
    ///
    /// Re-enabling an enabled trigger only re-announces its settings; the
    /// throttle window (`last_notify_ms`) is left alone.
    pub fn set_enabled(&mut self, id: TriggerId, enable: bool, delegate: &mut impl TriggerDelegate) {
        let slot = self.slot_mut(id);
        if slot.enabled && enable {
            debug!("Trigger: {} settings refreshed", id.name());
            delegate.on_trigger_updated(id);
        } else if slot.enabled != enable {
            slot.enabled = enable;
            slot.notify_pending = false;
            slot.deferred = false;
            info!("Trigger: {} {}", id.name(), if enable { "enabled" } else { "disabled" });
            delegate.on_trigger_updated(id);
        }
    }

    // ── Link events ───────────────────────────────────────────

    pub fn on_connect(&mut self) {
        for slot in &mut self.slots {
            slot.notify_pending = false;
            slot.deferred = false;
        }
    }

    /// No peer left to notify: power every trigger source down.
    pub fn on_disconnect(&mut self, delegate: &mut impl TriggerDelegate) {
        for id in TriggerId::ALL {
            self.set_enabled(id, false, delegate);
        }
    }

    // ── Peer reads / writes ───────────────────────────────────

    /// Subscription descriptor of a trigger value; maps onto enable/disable.
    pub fn write_subscription(
        &mut self,
        id: TriggerId,
        bytes: &[u8],
        delegate: &mut impl TriggerDelegate,
    ) -> Result<(), TriggerError> {
        let sub = Subscription::decode(bytes)?;
        self.set_enabled(id, sub.is_on(), delegate);
        Ok(())
    }

    /// Direct read of a trigger value. The first read powers the sensor up,
    /// so it returns whatever was cached before.
    pub fn read_value(&mut self, id: TriggerId, delegate: &mut impl TriggerDelegate) -> [u8; VALUE_LEN] {
        if !self.slot(id).enabled {
            self.set_enabled(id, true, delegate);
        }
        self.slot(id).value.to_le_bytes()
    }

    pub fn read_value_setting(&self, id: TriggerId) -> Vec<u8, VALUE_SETTING_MAX_LEN> {
        self.slot(id).value_trigger.encode()
    }

    pub fn read_time_setting(&self, id: TriggerId) -> Vec<u8, TIME_SETTING_MAX_LEN> {
        self.slot(id).time_trigger.encode()
    }

    pub fn write_value_setting(
        &mut self,
        id: TriggerId,
        bytes: &[u8],
        delegate: &mut impl TriggerDelegate,
    ) -> Result<(), TriggerError> {
        let code = *bytes.first().ok_or(TriggerError::InvalidLength)?;
        let supported = ValueCondition::from_u8(code).is_some_and(|c| id.supports_value(c));
        if !supported {
            warn!("Trigger: {} value condition {} not supported", id.name(), code);
            return Err(TriggerError::UnsupportedCondition);
        }
        let setting = ValueTrigger::decode(bytes)?;

        info!("Trigger: {} value condition {:?}", id.name(), setting);
        self.slot_mut(id).value_trigger = setting;
        self.announce_if_enabled(id, delegate);
        Ok(())
    }

    pub fn write_time_setting(
        &mut self,
        id: TriggerId,
        bytes: &[u8],
        delegate: &mut impl TriggerDelegate,
    ) -> Result<(), TriggerError> {
        let code = *bytes.first().ok_or(TriggerError::InvalidLength)?;
        let supported = TimeCondition::from_u8(code).is_some_and(|c| id.supports_time(c));
        if !supported {
            warn!("Trigger: {} time condition {} not supported", id.name(), code);
            return Err(TriggerError::UnsupportedCondition);
        }
        let setting = TimeTrigger::decode(bytes)?;

        info!("Trigger: {} time condition {:?}", id.name(), setting);
        self.slot_mut(id).time_trigger = setting;
        self.announce_if_enabled(id, delegate);
        Ok(())
    }

    fn announce_if_enabled(&mut self, id: TriggerId, delegate: &mut impl TriggerDelegate) {
        if self.slot(id).enabled {
            self.set_enabled(id, true, delegate);
        }
    }

    // ── Sensor samples ────────────────────────────────────────

    /// Store a new sample and notify the peer if the trigger fires.
    ///
    /// Returns whether a notification was sent.
    pub fn push_value(
        &mut self,
        id: TriggerId,
        new_value: i32,
        now_ms: u32,
        radio: &mut impl Radio,
    ) -> Result<bool, RadioError> {
        let retry_deferred = self.retry_deferred;
        let slot = self.slot_mut(id);
        let old_value = slot.value;
        slot.value = new_value;
        debug!("Trigger: {} sample {} -> {}", id.name(), old_value, new_value);

        if !slot.enabled || slot.notify_pending {
            return Ok(false);
        }
        if !slot.value_trigger.is_met(old_value, new_value) {
            return Ok(false);
        }
        if !slot.time_trigger.permits(now_ms.wrapping_sub(slot.last_notify_ms)) {
            if retry_deferred {
                slot.deferred = true;
            }
            debug!("Trigger: {} held back by time gate", id.name());
            return Ok(false);
        }

        self.notify(id, now_ms, radio)?;
        Ok(true)
    }

    pub fn push_motion(&mut self, active: bool, now_ms: u32, radio: &mut impl Radio) -> Result<bool, RadioError> {
        self.push_value(TriggerId::Motion, i32::from(active), now_ms, radio)
    }

    pub fn push_acceleration(&mut self, active: bool, now_ms: u32, radio: &mut impl Radio) -> Result<bool, RadioError> {
        self.push_value(TriggerId::Acceleration, i32::from(active), now_ms, radio)
    }

    /// Temperature in hundredths of a degree Celsius.
    pub fn push_temperature(&mut self, centi_celsius: i32, now_ms: u32, radio: &mut impl Radio) -> Result<bool, RadioError> {
        self.push_value(TriggerId::Temperature, centi_celsius, now_ms, radio)
    }

    /// Relative humidity in hundredths of a percent.
    pub fn push_humidity(&mut self, centi_percent: i32, now_ms: u32, radio: &mut impl Radio) -> Result<bool, RadioError> {
        self.push_value(TriggerId::Humidity, centi_percent, now_ms, radio)
    }

    /// Send deferred notifications whose time gate has opened.
    ///
    /// No-op unless the engine was built with `retry_deferred`.
    pub fn poll(&mut self, now_ms: u32, radio: &mut impl Radio) -> Result<(), RadioError> {
        if !self.retry_deferred {
            return Ok(());
        }
        for id in TriggerId::ALL {
            let slot = self.slot(id);
            let due = slot.enabled
                && slot.deferred
                && !slot.notify_pending
                && slot.time_trigger.permits(now_ms.wrapping_sub(slot.last_notify_ms));
            if due {
                self.notify(id, now_ms, radio)?;
            }
        }
        Ok(())
    }

    fn notify(&mut self, id: TriggerId, now_ms: u32, radio: &mut impl Radio) -> Result<(), RadioError> {
        let slot = self.slot_mut(id);
        slot.notify_pending = true;
        let result = radio.notify(Attribute::TriggerValue(id), 0, &slot.value.to_le_bytes());
        slot.notify_pending = false;
        slot.deferred = false;
        result?;

        slot.last_notify_ms = now_ms;
        info!("Trigger: {} notified value {}", id.name(), slot.value);
        Ok(())
    }
}
