//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ CameraService / engines (domain)
//! ```
//!
//! Driven adapters (radio, ISP, sensors, LED, storage, event sinks) implement
//! these traits. The engines and the [`CameraService`](super::service::CameraService)
//! take them as `&mut impl Trait` at call sites, so the domain core never
//! touches hardware directly.
//!
//! The two delegate traits run the other way: the engines call back into
//! whoever drives them, synchronously, from inside the handler that caused
//! the event.

use core::fmt;

use crate::config::SystemConfig;
use crate::error::{ConfigError, RadioError};
use crate::gatt::Attribute;
use crate::transfer::CaptureMode;
use crate::triggers::TriggerId;

// ───────────────────────────────────────────────────────────────
// Radio port (domain → BLE stack)
// ───────────────────────────────────────────────────────────────

/// Notification path of the GATT server.
pub trait Radio {
    /// Queue one notification on `attribute`.
    ///
    /// `tag` comes back unchanged with the matching completion so stale
    /// confirmations can be told apart.
    fn notify(&mut self, attribute: Attribute, tag: u16, data: &[u8]) -> Result<(), RadioError>;
}

// ───────────────────────────────────────────────────────────────
// Engine delegates (domain → orchestrator)
// ───────────────────────────────────────────────────────────────

/// Callbacks raised by the [`ImageTransfer`](crate::transfer::ImageTransfer) engine.
pub trait TransferDelegate {
    /// The peer asked for a picture; power up the ISP and capture.
    fn on_capture_requested(&mut self, mode: CaptureMode);
    /// The peer accepted the image info and wants the data.
    fn on_transfer_requested(&mut self);
    /// A packet was confirmed and more image bytes may be pushed.
    fn on_space_available(&mut self);
    /// Every byte of the image was confirmed.
    fn on_transfer_done(&mut self, mode: CaptureMode);
    /// The capture in progress was abandoned (peer cancel or link loss).
    fn on_capture_cancelled(&mut self);
}

/// Callback raised by the [`TriggerEngine`](crate::triggers::TriggerEngine)
/// when a trigger was enabled, disabled or reconfigured.
pub trait TriggerDelegate {
    fn on_trigger_updated(&mut self, id: TriggerId);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock. Wraps; consumers use wrapping differences.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Sensor ports (domain → peripherals)
// ───────────────────────────────────────────────────────────────

/// Image signal processor command path. Results come back as
/// [`IspEvent`](crate::events::IspEvent)s.
pub trait ImageSensorPort {
    /// Power up if needed and take a picture.
    fn capture(&mut self);
    /// Start reading the next chunk of image data.
    fn read_chunk(&mut self);
    fn power_down(&mut self);
}

/// Combined temperature / humidity sensor.
pub trait EnvSensorPort {
    /// (Re)start periodic sampling.
    fn start_measurement(&mut self, period_ms: u32) -> Result<(), SensorError>;
    fn stop_measurement(&mut self);
}

/// PIR detector and accelerometer motion detection.
pub trait MotionSensorPort {
    fn set_pir_enabled(&mut self, enabled: bool);
    fn set_accel_detection(&mut self, enabled: bool);
}

// ───────────────────────────────────────────────────────────────
// Link port (domain → BLE link layer)
// ───────────────────────────────────────────────────────────────

/// Connection parameter profile requested from the central.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnProfile {
    /// Short connection interval while an image is in flight.
    LowLatency,
    /// Long interval with slave latency while idle.
    LowPower,
}

pub trait LinkPort {
    /// Terminate the connection with an HCI reason code.
    fn disconnect(&mut self, reason: u8);
    fn request_conn_params(&mut self, profile: ConnProfile);
}

// ───────────────────────────────────────────────────────────────
// Activity LED port
// ───────────────────────────────────────────────────────────────

pub trait ActivityLedPort {
    /// Duty out of 255.
    fn set_activity(&mut self, duty: u8);
}

// ───────────────────────────────────────────────────────────────
// Board: everything the orchestrator drives
// ───────────────────────────────────────────────────────────────

/// All driven ports at once.
///
/// Passing one `&mut impl Board` avoids juggling several mutable borrows
/// while keeping each port boundary explicit.
pub trait Board:
    Radio + Clock + ImageSensorPort + EnvSensorPort + MotionSensorPort + LinkPort + ActivityLedPort
{
}

impl<T> Board for T where
    T: Radio + Clock + ImageSensorPort + EnvSensorPort + MotionSensorPort + LinkPort + ActivityLedPort
{
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate before persisting and reject invalid
/// values with [`ConfigError::ValidationFailed`] rather than clamping.
pub trait ConfigPort {
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from sensor ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Sensor still powering up or busy with a previous command.
    NotReady,
    /// Bus transaction failed.
    Bus,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "sensor not ready"),
            Self::Bus => write!(f, "bus error"),
        }
    }
}
