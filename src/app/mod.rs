//! Application core: domain orchestration with no I/O.
//!
//! Wires the picture transfer and sensor trigger engines to the camera's
//! peripherals. All interaction with hardware happens through **port
//! traits** defined in [`ports`], keeping this layer fully testable without
//! real peripherals.

pub mod events;
pub mod ports;
pub mod service;
