//! Hardware adapter: bridges the board to the domain port traits.
//!
//! [`CameraBoard`] owns the radio, the activity LED, the clock and the
//! camera peripherals, and exposes them all through the [`Board`] ports
//! the [`CameraService`](crate::app::service::CameraService) drives.
//!
//! The ISP, the environmental sensor and the motion detectors sit behind
//! [`SimPeripherals`]: a synthetic camera that answers capture and chunk
//! requests with generated JPEG-framed data and produces drifting
//! temperature/humidity samples. Results are handed over through the
//! run-loop [`EVENTS`] queue the same way interrupt-driven drivers would.
//!
//! [`Board`]: crate::app::ports::Board

use std::collections::VecDeque;

use embedded_hal::pwm::SetDutyCycle;
use log::{debug, info, warn};

use crate::adapters::ble_gatt::BleGattAdapter;
use crate::adapters::time::Esp32TimeAdapter;
use crate::app::ports::{
    ActivityLedPort, Clock, ConnProfile, EnvSensorPort, ImageSensorPort, LinkPort, MotionSensorPort,
    Radio, SensorError,
};
use crate::drivers::status_led::StatusLed;
use crate::error::RadioError;
use crate::events::{EVENTS, EnvSample, Event, IspEvent, IspReadyReason};
use crate::gatt::Attribute;

/// Synthetic frame geometry.
pub const SIM_WIDTH: u16 = 320;
pub const SIM_HEIGHT: u16 = 240;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

// ───────────────────────────────────────────────────────────────
// Simulated peripherals
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum IspMessage {
    Ready(IspReadyReason),
    ImageInfo { size: u32 },
    ImageData { offset: u32, data: Vec<u8> },
}

pub struct SimPeripherals {
    chunk_size: usize,
    image_size: u32,
    frame: u32,
    isp_powered: bool,
    read_offset: u32,
    isp_queue: VecDeque<IspMessage>,

    env_period_ms: Option<u32>,
    env_next_due: Option<u32>,
    env_count: u32,
    env_sample: Option<EnvSample>,

    pir_enabled: bool,
    accel_enabled: bool,
}

impl SimPeripherals {
    pub fn new(chunk_size: usize, image_size: u32) -> Self {
        Self {
            chunk_size,
            image_size: image_size.max(4),
            frame: 0,
            isp_powered: false,
            read_offset: 0,
            isp_queue: VecDeque::new(),
            env_period_ms: None,
            env_next_due: None,
            env_count: 0,
            env_sample: None,
            pir_enabled: false,
            accel_enabled: false,
        }
    }

    pub fn is_isp_powered(&self) -> bool {
        self.isp_powered
    }

    pub fn env_period(&self) -> Option<u32> {
        self.env_period_ms
    }

    pub fn pir_enabled(&self) -> bool {
        self.pir_enabled
    }

    pub fn accel_enabled(&self) -> bool {
        self.accel_enabled
    }

    /// Byte `i` of the current frame: SOI, counting pattern, EOI.
    fn frame_byte(&self, i: u32) -> u8 {
        let last = self.image_size - 1;
        match i {
            0 => JPEG_SOI[0],
            1 => JPEG_SOI[1],
            _ if i == last - 1 => JPEG_EOI[0],
            _ if i == last => JPEG_EOI[1],
            _ => (i as u8).wrapping_add(self.frame as u8),
        }
    }

    fn queue(&mut self, message: IspMessage) {
        self.isp_queue.push_back(message);
        if !EVENTS.push(Event::IspEventPending) {
            warn!("Sim: event queue full, IspEventPending dropped");
        }
    }

    /// Hand over the oldest ISP event; image data is copied into `buf`.
    pub fn take_isp_event<'b>(&mut self, buf: &'b mut [u8]) -> Option<IspEvent<'b>> {
        let event = match self.isp_queue.pop_front()? {
            IspMessage::Ready(reason) => IspEvent::Ready(reason),
            IspMessage::ImageInfo { size } => IspEvent::ImageInfo {
                size,
                width: SIM_WIDTH,
                height: SIM_HEIGHT,
            },
            IspMessage::ImageData { offset, data } => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                IspEvent::ImageData {
                    offset,
                    data: &buf[..n],
                }
            }
        };
        Some(event)
    }

    /// Take a measurement if one is due at `now_ms`; returns whether one was.
    pub fn poll_env(&mut self, now_ms: u32) -> bool {
        let Some(period) = self.env_period_ms else {
            return false;
        };
        let due = *self.env_next_due.get_or_insert(now_ms.wrapping_add(period));
        if (now_ms.wrapping_sub(due) as i32) < 0 {
            return false;
        }
        self.env_next_due = Some(now_ms.wrapping_add(period));
        self.env_count = self.env_count.wrapping_add(1);
        // Triangle wave: 21.00 – 22.90 °C, 45.00 – 47.85 %RH.
        let step = (self.env_count % 40) as i32;
        let wave = if step < 20 { step } else { 40 - step };
        self.env_sample = Some(EnvSample {
            temperature: 2_100 + wave * 10,
            humidity: 4_500 + wave * 15,
        });
        if !EVENTS.push(Event::EnvSampleReady) {
            warn!("Sim: event queue full, EnvSampleReady dropped");
        }
        true
    }

    pub fn take_env_sample(&mut self) -> Option<EnvSample> {
        self.env_sample.take()
    }
}

impl ImageSensorPort for SimPeripherals {
    fn capture(&mut self) {
        if !self.isp_powered {
            self.isp_powered = true;
            self.queue(IspMessage::Ready(IspReadyReason::PowerUp));
        }
        self.frame = self.frame.wrapping_add(1);
        self.read_offset = 0;
        debug!("ISP(sim): frame {} captured", self.frame);
        self.queue(IspMessage::ImageInfo {
            size: self.image_size,
        });
    }

    fn read_chunk(&mut self) {
        let remaining = self.image_size - self.read_offset;
        if remaining == 0 {
            return;
        }
        let n = remaining.min(self.chunk_size as u32);
        let offset = self.read_offset;
        let data = (offset..offset + n).map(|i| self.frame_byte(i)).collect();
        self.read_offset += n;
        self.queue(IspMessage::ImageData { offset, data });
        if self.read_offset == self.image_size {
            self.queue(IspMessage::Ready(IspReadyReason::TransferComplete));
        }
    }

    fn power_down(&mut self) {
        if self.isp_powered {
            debug!("ISP(sim): powered down");
        }
        self.isp_powered = false;
        self.isp_queue.clear();
    }
}

impl EnvSensorPort for SimPeripherals {
    fn start_measurement(&mut self, period_ms: u32) -> Result<(), SensorError> {
        if period_ms == 0 {
            return Err(SensorError::NotReady);
        }
        self.env_period_ms = Some(period_ms);
        self.env_next_due = None;
        Ok(())
    }

    fn stop_measurement(&mut self) {
        self.env_period_ms = None;
        self.env_next_due = None;
        self.env_sample = None;
    }
}

impl MotionSensorPort for SimPeripherals {
    fn set_pir_enabled(&mut self, enabled: bool) {
        self.pir_enabled = enabled;
    }

    fn set_accel_detection(&mut self, enabled: bool) {
        self.accel_enabled = enabled;
    }
}

// ───────────────────────────────────────────────────────────────
// Board
// ───────────────────────────────────────────────────────────────

/// Concrete adapter that combines all hardware behind the port traits.
pub struct CameraBoard<P> {
    pub ble: BleGattAdapter,
    pub led: StatusLed<P>,
    pub clock: Esp32TimeAdapter,
    pub peripherals: SimPeripherals,
}

impl<P: SetDutyCycle> CameraBoard<P> {
    pub fn new(
        ble: BleGattAdapter,
        led: StatusLed<P>,
        clock: Esp32TimeAdapter,
        peripherals: SimPeripherals,
    ) -> Self {
        info!("CameraBoard: ISP chunk {} bytes", peripherals.chunk_size);
        Self {
            ble,
            led,
            clock,
            peripherals,
        }
    }
}

impl<P> Radio for CameraBoard<P> {
    fn notify(&mut self, attribute: Attribute, tag: u16, data: &[u8]) -> Result<(), RadioError> {
        self.ble.notify(attribute, tag, data)
    }
}

impl<P> Clock for CameraBoard<P> {
    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }
}

impl<P> ImageSensorPort for CameraBoard<P> {
    fn capture(&mut self) {
        self.peripherals.capture();
    }

    fn read_chunk(&mut self) {
        self.peripherals.read_chunk();
    }

    fn power_down(&mut self) {
        self.peripherals.power_down();
    }
}

impl<P> EnvSensorPort for CameraBoard<P> {
    fn start_measurement(&mut self, period_ms: u32) -> Result<(), SensorError> {
        self.peripherals.start_measurement(period_ms)
    }

    fn stop_measurement(&mut self) {
        self.peripherals.stop_measurement();
    }
}

impl<P> MotionSensorPort for CameraBoard<P> {
    fn set_pir_enabled(&mut self, enabled: bool) {
        self.peripherals.set_pir_enabled(enabled);
    }

    fn set_accel_detection(&mut self, enabled: bool) {
        self.peripherals.set_accel_detection(enabled);
    }
}

impl<P> LinkPort for CameraBoard<P> {
    fn disconnect(&mut self, reason: u8) {
        self.ble.disconnect(reason);
    }

    fn request_conn_params(&mut self, profile: ConnProfile) {
        self.ble.request_conn_params(profile);
    }
}

impl<P: SetDutyCycle> ActivityLedPort for CameraBoard<P> {
    fn set_activity(&mut self, duty: u8) {
        self.led.set_activity(duty);
    }
}
