//! Activity LED driver.
//!
//! One PWM channel drives the status LED; brightness tracks what the
//! camera is doing (idle glow, capture, transfer, DFU).
//!
//! ## Dual-target design
//!
//! On ESP-IDF: an LEDC channel (`esp_idf_hal::ledc::LedcDriver`).
//! On host/test: any `embedded_hal::pwm::SetDutyCycle` fake.

use embedded_hal::pwm::SetDutyCycle;
use log::warn;

use crate::app::ports::ActivityLedPort;

/// Full-scale duty of [`ActivityLedPort::set_activity`].
pub const DUTY_SCALE: u16 = 255;

pub struct StatusLed<P> {
    pwm: P,
    current: u8,
}

impl<P: SetDutyCycle> StatusLed<P> {
    pub fn new(pwm: P) -> Self {
        Self { pwm, current: 0 }
    }

    pub fn current_duty(&self) -> u8 {
        self.current
    }

    pub fn off(&mut self) {
        self.set_activity(0);
    }
}

impl<P: SetDutyCycle> ActivityLedPort for StatusLed<P> {
    fn set_activity(&mut self, duty: u8) {
        if duty == self.current {
            return;
        }
        match self.pwm.set_duty_cycle_fraction(u16::from(duty), DUTY_SCALE) {
            Ok(()) => self.current = duty,
            Err(e) => warn!("LED: duty {} rejected ({:?})", duty, e),
        }
    }
}
