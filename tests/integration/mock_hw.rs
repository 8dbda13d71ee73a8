//! Mock board for integration tests.
//!
//! Records every port call so tests can assert on the full command history
//! without a radio or camera, and plays the peer side of the notification
//! path: image data notifications stay unconfirmed until a test confirms
//! them.

use std::cell::Cell;
use std::collections::VecDeque;

use camsense::app::events::AppEvent;
use camsense::app::ports::{
    ActivityLedPort, Clock, ConnProfile, EnvSensorPort, EventSink, ImageSensorPort, LinkPort,
    MotionSensorPort, Radio, SensorError,
};
use camsense::error::RadioError;
use camsense::gatt::Attribute;
use camsense::transfer::flow::MAX_PENDING;

// ── Port call record ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum BoardCall {
    Capture,
    ReadChunk,
    PowerDown,
    StartMeasurement(u32),
    StopMeasurement,
    SetPir(bool),
    SetAccel(bool),
    Disconnect(u8),
    ConnParams(ConnProfile),
    Led(u8),
}

// ── MockBoard ─────────────────────────────────────────────────

pub struct MockBoard {
    pub calls: Vec<BoardCall>,
    /// Every notification, in send order: (attribute, tag, bytes).
    pub sent: Vec<(Attribute, u16, Vec<u8>)>,
    /// Image data notifications the peer has not confirmed yet.
    pub unconfirmed: VecDeque<(Attribute, u16)>,
    pub now: Cell<u32>,
    pub refuse_notify: bool,
    /// Largest number of unconfirmed image data packets ever seen.
    pub peak_pending: usize,
}

#[allow(dead_code)]
impl MockBoard {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            sent: Vec::new(),
            unconfirmed: VecDeque::new(),
            now: Cell::new(1_000),
            refuse_notify: false,
            peak_pending: 0,
        }
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }

    pub fn count(&self, call: &BoardCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn called(&self, call: &BoardCall) -> bool {
        self.count(call) > 0
    }

    pub fn last_conn_params(&self) -> Option<ConnProfile> {
        self.calls.iter().rev().find_map(|c| match c {
            BoardCall::ConnParams(p) => Some(*p),
            _ => None,
        })
    }

    pub fn last_led(&self) -> Option<u8> {
        self.calls.iter().rev().find_map(|c| match c {
            BoardCall::Led(d) => Some(*d),
            _ => None,
        })
    }

    pub fn sent_on(&self, attribute: Attribute) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|(a, _, _)| *a == attribute)
            .map(|(_, _, d)| d.clone())
            .collect()
    }

    pub fn pop_unconfirmed(&mut self) -> Option<(Attribute, u16)> {
        self.unconfirmed.pop_front()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.sent.clear();
    }
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for MockBoard {
    fn notify(&mut self, attribute: Attribute, tag: u16, data: &[u8]) -> Result<(), RadioError> {
        if self.refuse_notify {
            return Err(RadioError::QueueFull);
        }
        self.sent.push((attribute, tag, data.to_vec()));
        if attribute == Attribute::ImageData {
            self.unconfirmed.push_back((attribute, tag));
            self.peak_pending = self.peak_pending.max(self.unconfirmed.len());
            assert!(self.unconfirmed.len() <= usize::from(MAX_PENDING));
        }
        Ok(())
    }
}

impl Clock for MockBoard {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}

impl ImageSensorPort for MockBoard {
    fn capture(&mut self) {
        self.calls.push(BoardCall::Capture);
    }

    fn read_chunk(&mut self) {
        self.calls.push(BoardCall::ReadChunk);
    }

    fn power_down(&mut self) {
        self.calls.push(BoardCall::PowerDown);
    }
}

impl EnvSensorPort for MockBoard {
    fn start_measurement(&mut self, period_ms: u32) -> Result<(), SensorError> {
        self.calls.push(BoardCall::StartMeasurement(period_ms));
        Ok(())
    }

    fn stop_measurement(&mut self) {
        self.calls.push(BoardCall::StopMeasurement);
    }
}

impl MotionSensorPort for MockBoard {
    fn set_pir_enabled(&mut self, enabled: bool) {
        self.calls.push(BoardCall::SetPir(enabled));
    }

    fn set_accel_detection(&mut self, enabled: bool) {
        self.calls.push(BoardCall::SetAccel(enabled));
    }
}

impl LinkPort for MockBoard {
    fn disconnect(&mut self, reason: u8) {
        self.calls.push(BoardCall::Disconnect(reason));
    }

    fn request_conn_params(&mut self, profile: ConnProfile) {
        self.calls.push(BoardCall::ConnParams(profile));
    }
}

impl ActivityLedPort for MockBoard {
    fn set_activity(&mut self, duty: u8) {
        self.calls.push(BoardCall::Led(duty));
    }
}

// ── RecordingSink ─────────────────────────────────────────────

pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn contains(&self, event: &AppEvent) -> bool {
        self.events.contains(event)
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}
