//! Peripheral drivers behind embedded-hal traits.

pub mod motion_input;
pub mod status_led;
