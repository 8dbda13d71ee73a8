//! CamSense firmware library.
//!
//! A battery-powered BLE camera: a peer requests pictures over a GATT
//! picture transfer service and subscribes to sensor triggers
//! (temperature, humidity, PIR, accelerometer) over a trigger service.
//!
//! The pure-logic modules are exposed for integration testing. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod dfu;
pub mod error;
pub mod events;
pub mod gatt;
pub mod ring_buffer;
pub mod transfer;
pub mod triggers;

pub mod adapters;
pub mod drivers;
