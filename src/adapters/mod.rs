//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements                  | Connects to                 |
//! |------------|-----------------------------|-----------------------------|
//! | `ble_gatt` | Radio, LinkPort             | Bluedroid GATT server       |
//! | `hardware` | Board (all driven ports)    | BLE, LEDC, timer, ISP/env   |
//! | `log_sink` | EventSink                   | Serial log output           |
//! | `nvs`      | ConfigPort                  | NVS / in-memory store       |
//! | `time`     | Clock                       | ESP32 system timer          |

pub mod ble_gatt;
pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod time;
