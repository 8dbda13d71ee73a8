//! Edge-detecting input for the PIR output and the accelerometer interrupt.
//!
//! The run loop polls each line; a level change becomes a run-loop
//! [`Event`] on the shared queue.
//!
//! | Line           | Rising           | Falling         |
//! |----------------|------------------|-----------------|
//! | PIR output     | `PirMotionStart` | `PirMotionEnd`  |
//! | Accel INT1     | `AccelMotion`    | n/a             |

use embedded_hal::digital::InputPin;
use log::warn;

use crate::events::{Event, EventQueue};

pub struct EdgeInput<P> {
    pin: P,
    level: bool,
    rising: Event,
    falling: Option<Event>,
}

impl<P: InputPin> EdgeInput<P> {
    /// PIR detector output: both edges matter.
    pub fn pir(pin: P) -> Self {
        Self::new(pin, Event::PirMotionStart, Some(Event::PirMotionEnd))
    }

    /// Accelerometer motion interrupt: only the assertion matters.
    pub fn accel(pin: P) -> Self {
        Self::new(pin, Event::AccelMotion, None)
    }

    fn new(pin: P, rising: Event, falling: Option<Event>) -> Self {
        Self {
            pin,
            level: false,
            rising,
            falling,
        }
    }

    /// Sample the line; queue and return the event of an edge, if any.
    pub fn poll(&mut self, queue: &EventQueue) -> Option<Event> {
        let level = match self.pin.is_high() {
            Ok(level) => level,
            Err(e) => {
                warn!("Input: read failed ({:?})", e);
                return None;
            }
        };
        if level == self.level {
            return None;
        }
        self.level = level;
        let event = if level { Some(self.rising) } else { self.falling }?;
        if !queue.push(event) {
            warn!("Input: event queue full, {:?} dropped", event);
        }
        Some(event)
    }

    /// Forget the last level, e.g. after the detector was re-enabled.
    pub fn reset(&mut self) {
        self.level = false;
    }
}
