//! Camera service, the hexagonal core.
//!
//! [`CameraService`] owns the image cache, the picture transfer engine, the
//! trigger engine and the DFU control. It turns radio, ISP and sensor
//! events into engine calls and engine callbacks into peripheral commands.
//! All I/O flows through port traits passed at call sites.
//!
//! ```text
//!   GATT writes ─┐                                    ┌─▶ Radio (notify)
//!   ISP events ──┼─▶ ┌──────────────────────────────┐ ─┼─▶ ISP / env / PIR / accel
//!   sensor data ─┘   │         CameraService        │  ├─▶ Link, activity LED
//!                    │ cache · transfer · triggers  │  └─▶ EventSink
//!                    └──────────────────────────────┘
//! ```
//!
//! Engine callbacks are collected in an [`Outbox`] during the engine call
//! and dispatched right after it returns, so a callback never re-enters an
//! engine that is still on the stack.

use heapless::Vec;
use log::{debug, error, info, warn};

use crate::config::SystemConfig;
use crate::dfu::DfuControl;
use crate::error::{self, AttError, ConfigError, FlowError, TransferError};
use crate::events::{EnvSample, IspEvent, IspReadyReason};
use crate::gatt::{Attribute, GattTarget, Subscription};
use crate::ring_buffer::RingBuffer;
use crate::transfer::protocol::AbortReason;
use crate::transfer::{CaptureMode, ImageTransfer, MAX_PACKET_LEN, TransferState};
use crate::triggers::condition::{
    TIME_SETTING_MAX_LEN, TimeCondition, VALUE_SETTING_MAX_LEN, ValueCondition,
};
use crate::triggers::{TriggerEngine, TriggerId, VALUE_LEN};

use super::events::{AppEvent, TransferStats};
use super::ports::{Board, ConnProfile, EventSink, TransferDelegate, TriggerDelegate};

/// HCI reason: remote user terminated connection.
pub const HCI_REMOTE_USER_TERMINATED: u8 = 0x13;
/// HCI reason: connection terminated by local host.
pub const HCI_LOCAL_HOST_TERMINATED: u8 = 0x16;

/// Floor for the derived environmental sampling period.
pub const MIN_ENV_SAMPLE_PERIOD_MS: u32 = 1_000;

const OUTBOX_CAP: usize = 8;

/// Longest value any readable attribute returns.
pub const READ_VALUE_MAX_LEN: usize = VALUE_SETTING_MAX_LEN;

/// Value of an attribute read.
pub type ReadValue = Vec<u8, READ_VALUE_MAX_LEN>;

// ───────────────────────────────────────────────────────────────
// Outbox
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    CaptureRequested(CaptureMode),
    TransferRequested,
    SpaceAvailable,
    TransferDone(CaptureMode),
    CaptureCancelled,
    TriggerUpdated(TriggerId),
}

/// Delegate handed to the engines; queues their callbacks.
#[derive(Default)]
struct Outbox {
    actions: Vec<Action, OUTBOX_CAP>,
}

impl Outbox {
    fn push(&mut self, action: Action) {
        if self.actions.push(action).is_err() {
            error!("Outbox full, dropped {:?}", action);
        }
    }
}

impl TransferDelegate for Outbox {
    fn on_capture_requested(&mut self, mode: CaptureMode) {
        self.push(Action::CaptureRequested(mode));
    }
    fn on_transfer_requested(&mut self) {
        self.push(Action::TransferRequested);
    }
    fn on_space_available(&mut self) {
        self.push(Action::SpaceAvailable);
    }
    fn on_transfer_done(&mut self, mode: CaptureMode) {
        self.push(Action::TransferDone(mode));
    }
    fn on_capture_cancelled(&mut self) {
        self.push(Action::CaptureCancelled);
    }
}

impl TriggerDelegate for Outbox {
    fn on_trigger_updated(&mut self, id: TriggerId) {
        self.push(Action::TriggerUpdated(id));
    }
}

// ───────────────────────────────────────────────────────────────
// CameraService
// ───────────────────────────────────────────────────────────────

/// Application orchestrator. `N` is the image cache capacity in bytes.
pub struct CameraService<const N: usize> {
    config: SystemConfig,
    cache: RingBuffer<N>,
    transfer: ImageTransfer,
    triggers: TriggerEngine,
    dfu: DfuControl,

    connected: bool,
    isp_powered: bool,
    isp_read_in_progress: bool,
    /// Powered, image fully read, waiting for the next capture command.
    isp_idle: bool,
    /// Image bytes requested from the ISP so far.
    isp_bytes_read: u32,
    image_size: u32,
    env_period_ms: Option<u32>,

    // Timestamps for transfer statistics (ms, wrapping).
    time_capture_req: u32,
    time_capture_start: u32,
    time_transfer_start: u32,
    power_up_ms: u32,
    capture_ms: u32,
}

impl<const N: usize> CameraService<N> {
    /// Build the service; fails if `config` does not fit a cache of `N` bytes.
    pub fn new(config: SystemConfig) -> Result<Self, ConfigError> {
        config.validate(N)?;
        let triggers = TriggerEngine::new(config.retry_deferred_notifications);
        info!(
            "CameraService: cache {} bytes, ISP chunk {} bytes",
            config.image_cache_bytes(),
            config.isp_chunk_size
        );
        Ok(Self {
            config,
            cache: RingBuffer::new(),
            transfer: ImageTransfer::new(),
            triggers,
            dfu: DfuControl::new(),
            connected: false,
            isp_powered: false,
            isp_read_in_progress: false,
            isp_idle: false,
            isp_bytes_read: 0,
            image_size: 0,
            env_period_ms: None,
            time_capture_req: 0,
            time_capture_start: 0,
            time_transfer_start: 0,
            power_up_ms: 0,
            capture_ms: 0,
        })
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn transfer(&self) -> &ImageTransfer {
        &self.transfer
    }

    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_isp_powered(&self) -> bool {
        self.isp_powered
    }

    /// Image bytes waiting in the cache.
    pub fn cache_used(&self) -> usize {
        self.cache.used()
    }

    /// Environmental sampling period currently applied; `None` when stopped.
    pub fn env_sample_period(&self) -> Option<u32> {
        self.env_period_ms
    }

    /// DFU entry was armed by the peer.
    pub fn dfu_requested(&self) -> bool {
        self.dfu.dfu_requested()
    }

    /// Sampling period the enabled temperature/humidity triggers call for.
    ///
    /// The configured default, lowered to the shortest `MinInterval` of an
    /// enabled trigger that has a value condition. `None` when neither
    /// trigger is enabled.
    pub fn derive_env_sample_period(&self) -> Option<u32> {
        let env = [TriggerId::Temperature, TriggerId::Humidity];
        if !env.iter().any(|id| self.triggers.is_enabled(*id)) {
            return None;
        }
        let mut period = self.config.env_sample_period_ms;
        for id in env {
            let s = self.triggers.settings(id);
            if self.triggers.is_enabled(id)
                && s.value_condition != ValueCondition::NoTrigger
                && s.time_condition == TimeCondition::MinInterval
            {
                period = period.min(s.time_interval_ms);
            }
        }
        Some(period.max(MIN_ENV_SAMPLE_PERIOD_MS))
    }

    // ── Link events ───────────────────────────────────────────

    pub fn on_connect(&mut self, hw: &mut impl Board, sink: &mut impl EventSink) {
        let before = self.transfer.state();
        self.connected = true;
        self.transfer.on_connect();
        self.triggers.on_connect();
        self.reset_cache();
        hw.set_activity(self.config.led_idle_duty);
        sink.emit(&AppEvent::Connected);
        self.emit_transition(before, sink);
    }

    pub fn on_disconnect(&mut self, hw: &mut impl Board, sink: &mut impl EventSink) {
        let before = self.transfer.state();
        self.connected = false;

        let mut outbox = Outbox::default();
        self.transfer.on_disconnect(&mut outbox);
        self.triggers.on_disconnect(&mut outbox);
        self.dispatch(outbox, hw, sink);

        // A capture still waiting for the ISP has no cancel callback.
        self.stop_isp(hw);
        self.reset_cache();
        hw.set_activity(self.config.led_idle_duty);
        sink.emit(&AppEvent::Disconnected);
        self.emit_transition(before, sink);
    }

    /// Data length / MTU renegotiation. A change mid-transfer drops the link.
    pub fn on_packet_size_changed(&mut self, max_tx_octets: u16, hw: &mut impl Board) -> Result<(), FlowError> {
        match self.transfer.on_packet_size_changed(max_tx_octets) {
            Err(FlowError::TransferInProgress) => {
                error!("Packet size changed to {} mid-transfer, disconnecting", max_tx_octets);
                hw.disconnect(HCI_LOCAL_HOST_TERMINATED);
                Err(FlowError::TransferInProgress)
            }
            Err(e) => {
                warn!("Packet size change ignored: {}", e);
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    /// The radio finished sending a notification.
    pub fn on_notification_complete(
        &mut self,
        attribute: Attribute,
        tag: u16,
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) {
        let before = self.transfer.state();
        let mut outbox = Outbox::default();
        self.transfer.on_notification_complete(attribute, tag, &mut outbox);
        self.dispatch(outbox, hw, sink);
        self.emit_transition(before, sink);
    }

    // ── Picture transfer attributes ───────────────────────────

    pub fn write_control_point(
        &mut self,
        bytes: &[u8],
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) -> Result<(), AttError> {
        let before = self.transfer.state();
        let mut outbox = Outbox::default();
        let result = self.transfer.handle_control_write(bytes, hw, &mut outbox);
        self.dispatch(outbox, hw, sink);
        self.emit_transition(before, sink);
        result.map_err(AttError::from)
    }

    pub fn write_info_subscription(&mut self, bytes: &[u8]) -> Result<(), AttError> {
        self.transfer.write_info_subscription(bytes)?;
        Ok(())
    }

    pub fn read_info_subscription(&self) -> [u8; Subscription::LEN] {
        let sub = if self.transfer.info_subscribed() {
            Subscription::Notify
        } else {
            Subscription::Off
        };
        sub.encode()
    }

    /// Data attribute subscription: validated, not tracked.
    pub fn write_data_subscription(&mut self, bytes: &[u8]) -> Result<(), AttError> {
        let sub = Subscription::decode(bytes).map_err(TransferError::from)?;
        debug!("Data notifications {:?}", sub);
        Ok(())
    }

    // ── Sensor trigger attributes ─────────────────────────────

    pub fn write_trigger_subscription(
        &mut self,
        id: TriggerId,
        bytes: &[u8],
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) -> Result<(), AttError> {
        let mut outbox = Outbox::default();
        let result = self.triggers.write_subscription(id, bytes, &mut outbox);
        self.dispatch(outbox, hw, sink);
        result.map_err(AttError::from)
    }

    pub fn write_trigger_value_setting(
        &mut self,
        id: TriggerId,
        bytes: &[u8],
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) -> Result<(), AttError> {
        let mut outbox = Outbox::default();
        let result = self.triggers.write_value_setting(id, bytes, &mut outbox);
        self.dispatch(outbox, hw, sink);
        result.map_err(AttError::from)
    }

    pub fn write_trigger_time_setting(
        &mut self,
        id: TriggerId,
        bytes: &[u8],
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) -> Result<(), AttError> {
        let mut outbox = Outbox::default();
        let result = self.triggers.write_time_setting(id, bytes, &mut outbox);
        self.dispatch(outbox, hw, sink);
        result.map_err(AttError::from)
    }

    /// Direct value read; enables the trigger (and its sensor) on first use.
    pub fn read_trigger_value(
        &mut self,
        id: TriggerId,
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) -> [u8; VALUE_LEN] {
        let mut outbox = Outbox::default();
        let bytes = self.triggers.read_value(id, &mut outbox);
        self.dispatch(outbox, hw, sink);
        bytes
    }

    pub fn read_trigger_value_setting(&self, id: TriggerId) -> Vec<u8, VALUE_SETTING_MAX_LEN> {
        self.triggers.read_value_setting(id)
    }

    pub fn read_trigger_time_setting(&self, id: TriggerId) -> Vec<u8, TIME_SETTING_MAX_LEN> {
        self.triggers.read_time_setting(id)
    }

    // ── DFU attribute ─────────────────────────────────────────

    /// Arm DFU entry and drop the peer so the run loop can hand over.
    pub fn write_dfu(
        &mut self,
        bytes: &[u8],
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) -> Result<(), AttError> {
        self.dfu.handle_write(bytes)?;
        hw.set_activity(self.config.led_dfu_duty);
        sink.emit(&AppEvent::DfuArmed);
        hw.disconnect(HCI_REMOTE_USER_TERMINATED);
        Ok(())
    }

    // ── Attribute routing ─────────────────────────────────────

    /// Route a peer write to the attribute it targets.
    pub fn handle_gatt_write(
        &mut self,
        target: GattTarget,
        bytes: &[u8],
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) -> Result<(), AttError> {
        match target {
            GattTarget::ControlPoint => self.write_control_point(bytes, hw, sink),
            GattTarget::InfoSubscription => self.write_info_subscription(bytes),
            GattTarget::DataSubscription => self.write_data_subscription(bytes),
            GattTarget::TriggerSubscription(id) => self.write_trigger_subscription(id, bytes, hw, sink),
            GattTarget::ValueTriggerSetting(id) => self.write_trigger_value_setting(id, bytes, hw, sink),
            GattTarget::TimeTriggerSetting(id) => self.write_trigger_time_setting(id, bytes, hw, sink),
            GattTarget::DfuEnter => self.write_dfu(bytes, hw, sink),
            GattTarget::TriggerValue(_) => Err(AttError::RequestNotSupported),
        }
    }

    /// Route a peer read to the attribute it targets.
    pub fn handle_gatt_read(
        &mut self,
        target: GattTarget,
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) -> Result<ReadValue, AttError> {
        let mut out = ReadValue::new();
        let filled = match target {
            GattTarget::InfoSubscription => out.extend_from_slice(&self.read_info_subscription()),
            GattTarget::DataSubscription => out.extend_from_slice(&Subscription::Off.encode()),
            GattTarget::TriggerSubscription(id) => {
                let sub = if self.triggers.is_enabled(id) {
                    Subscription::Notify
                } else {
                    Subscription::Off
                };
                out.extend_from_slice(&sub.encode())
            }
            GattTarget::TriggerValue(id) => {
                out.extend_from_slice(&self.read_trigger_value(id, hw, sink))
            }
            GattTarget::ValueTriggerSetting(id) => {
                out.extend_from_slice(&self.read_trigger_value_setting(id))
            }
            GattTarget::TimeTriggerSetting(id) => {
                out.extend_from_slice(&self.read_trigger_time_setting(id))
            }
            GattTarget::ControlPoint | GattTarget::DfuEnter => {
                return Err(AttError::RequestNotSupported);
            }
        };
        filled.map_err(|_| AttError::Unlikely)?;
        Ok(out)
    }

    // ── ISP events ────────────────────────────────────────────

    pub fn on_isp_event(
        &mut self,
        event: IspEvent<'_>,
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) {
        let before = self.transfer.state();
        match event {
            IspEvent::Error { state, code } => {
                error!("ISP: error state={} code={}", state, code);
                self.fail_capture(hw, sink);
            }
            IspEvent::Ready(IspReadyReason::TransferComplete) => {
                if !self.transfer.is_continuous_capture() {
                    self.stop_isp(hw);
                } else if self.transfer.state() == TransferState::CaptureRequested {
                    debug!("ISP: ready, capturing next frame");
                    self.start_capture(hw);
                    self.power_up_ms = 0;
                } else {
                    // Peer still draining; the next capture starts on transfer done.
                    debug!("ISP: ready, holding until the image is delivered");
                    self.isp_idle = true;
                }
            }
            IspEvent::Ready(IspReadyReason::PowerUp) => {
                let now = hw.now_ms();
                self.time_capture_start = now;
                self.power_up_ms = now.wrapping_sub(self.time_capture_req);
                debug!("ISP: powered up in {} ms", self.power_up_ms);
            }
            IspEvent::ImageInfo { size, width, height } => {
                self.capture_ms = hw.now_ms().wrapping_sub(self.time_capture_start);
                info!("ISP: image {}x{} {} bytes in {} ms", width, height, size, self.capture_ms);
                sink.emit(&AppEvent::ImageCaptured { size, width, height });
                self.image_size = size;
                self.isp_bytes_read = 0;

                if let Err(e) = self.transfer.start_image_transfer(size, hw) {
                    warn!("Image info rejected: {}", e);
                    if self.transfer.state() == TransferState::CaptureRequested {
                        self.fail_capture(hw, sink);
                    } else {
                        // Previous image still draining; re-captured once it is done.
                        self.stop_isp(hw);
                    }
                }
            }
            IspEvent::ImageData { offset, data } => {
                if offset & 0xFFF == 0 {
                    debug!("ISP: image data offset={}", offset);
                }
                self.on_image_data(data, hw, sink);
            }
        }
        self.emit_transition(before, sink);
    }

    fn on_image_data(&mut self, data: &[u8], hw: &mut impl Board, sink: &mut impl EventSink) {
        if !self.isp_read_in_progress {
            warn!("ISP: unsolicited image data ({} bytes) dropped", data.len());
            return;
        }
        self.isp_read_in_progress = false;

        let fed = self
            .cache
            .push(data)
            .map_err(error::Error::from)
            .and_then(|()| self.pump_image_data(hw));
        if let Err(e) = fed {
            error!("Image path: {}", e);
            self.fail_capture(hw, sink);
            return;
        }
        self.read_next_chunk(hw);
    }

    // ── Sensor inputs ─────────────────────────────────────────

    pub fn on_env_sample(
        &mut self,
        sample: EnvSample,
        hw: &mut impl Board,
        sink: &mut impl EventSink,
    ) {
        debug!("ENV: temp={} hum={}", sample.temperature, sample.humidity);
        self.push_trigger(TriggerId::Temperature, sample.temperature, hw, sink);
        self.push_trigger(TriggerId::Humidity, sample.humidity, hw, sink);
    }

    /// PIR edge: report the new state, then fall back to idle.
    pub fn on_pir_edge(&mut self, active: bool, hw: &mut impl Board, sink: &mut impl EventSink) {
        info!("PIR: motion {}", if active { "start" } else { "end" });
        self.push_trigger(TriggerId::Motion, i32::from(active), hw, sink);
        self.push_trigger(TriggerId::Motion, 0, hw, sink);
    }

    /// Accelerometer interrupt: a one-sample pulse.
    pub fn on_accel_event(&mut self, hw: &mut impl Board, sink: &mut impl EventSink) {
        info!("ACCEL: motion detected");
        self.push_trigger(TriggerId::Acceleration, 1, hw, sink);
        self.push_trigger(TriggerId::Acceleration, 0, hw, sink);
    }

    /// Periodic housekeeping: deferred trigger notifications.
    pub fn tick(&mut self, hw: &mut impl Board) {
        let now = hw.now_ms();
        if let Err(e) = self.triggers.poll(now, hw) {
            warn!("Trigger retry failed: {}", e);
        }
    }

    fn push_trigger(&mut self, id: TriggerId, value: i32, hw: &mut impl Board, sink: &mut impl EventSink) {
        let now = hw.now_ms();
        match self.triggers.push_value(id, value, now, hw) {
            Ok(true) => sink.emit(&AppEvent::TriggerNotified { id, value }),
            Ok(false) => {}
            Err(e) => warn!("Trigger {} notification failed: {}", id.name(), e),
        }
    }

    // ── Engine callbacks ──────────────────────────────────────

    fn dispatch(&mut self, outbox: Outbox, hw: &mut impl Board, sink: &mut impl EventSink) {
        for action in outbox.actions {
            match action {
                Action::CaptureRequested(mode) => {
                    hw.request_conn_params(ConnProfile::LowLatency);
                    self.time_capture_req = hw.now_ms();
                    self.start_capture(hw);
                    hw.set_activity(self.config.led_capture_duty);
                    sink.emit(&AppEvent::CaptureStarted(mode));
                }
                Action::CaptureCancelled => {
                    if self.connected {
                        hw.request_conn_params(ConnProfile::LowPower);
                    }
                    self.stop_isp(hw);
                    self.reset_cache();
                    hw.set_activity(self.config.led_idle_duty);
                }
                Action::TransferRequested => {
                    self.time_transfer_start = hw.now_ms();
                    self.reset_cache();
                    self.read_next_chunk(hw);
                    hw.set_activity(self.config.led_transfer_duty);
                }
                Action::SpaceAvailable => {
                    if let Err(e) = self.pump_image_data(hw) {
                        error!("Image path: {}", e);
                        self.fail_capture(hw, sink);
                    } else {
                        self.read_next_chunk(hw);
                    }
                }
                Action::TransferDone(mode) => {
                    if mode != CaptureMode::Continuous {
                        hw.request_conn_params(ConnProfile::LowPower);
                    } else if !self.isp_powered || self.isp_idle {
                        self.time_capture_req = hw.now_ms();
                        self.start_capture(hw);
                    }
                    let transfer_ms = hw.now_ms().wrapping_sub(self.time_transfer_start);
                    let stats = TransferStats {
                        power_up_ms: self.power_up_ms,
                        capture_ms: self.capture_ms,
                        transfer_ms,
                        image_size: self.image_size,
                        rate_bps: TransferStats::rate(self.image_size, transfer_ms),
                    };
                    sink.emit(&AppEvent::TransferStats(stats));
                    hw.set_activity(self.config.led_idle_duty);
                }
                Action::TriggerUpdated(id) => self.apply_trigger(id, hw, sink),
            }
        }
    }

    /// Power the sensor behind a trigger up or down to match its state.
    fn apply_trigger(&mut self, id: TriggerId, hw: &mut impl Board, sink: &mut impl EventSink) {
        let enabled = self.triggers.is_enabled(id);
        match id {
            TriggerId::Motion => hw.set_pir_enabled(enabled),
            TriggerId::Acceleration => hw.set_accel_detection(enabled),
            TriggerId::Temperature | TriggerId::Humidity => self.update_env_sampling(hw, sink),
        }
        sink.emit(&AppEvent::TriggerUpdated {
            id,
            enabled,
            settings: self.triggers.settings(id),
        });
    }

    fn update_env_sampling(&mut self, hw: &mut impl Board, sink: &mut impl EventSink) {
        let period = self.derive_env_sample_period();
        match period {
            Some(ms) => {
                hw.stop_measurement();
                if let Err(e) = hw.start_measurement(ms) {
                    warn!("Environmental sensor start failed: {}", e);
                }
            }
            None => hw.stop_measurement(),
        }
        if period != self.env_period_ms {
            info!("ENV: sampling period {:?} ms", period);
            self.env_period_ms = period;
            sink.emit(&AppEvent::EnvSamplingChanged(period));
        }
    }

    // ── Image pump ────────────────────────────────────────────

    fn chunk_size(&self) -> usize {
        self.config.isp_chunk_size as usize
    }

    fn cache_free(&self) -> usize {
        self.config
            .image_cache_bytes()
            .saturating_sub(self.cache.used())
    }

    /// Ask the ISP for the next chunk when none is in flight and the cache
    /// can hold it.
    fn read_next_chunk(&mut self, hw: &mut impl Board) {
        if self.isp_read_in_progress
            || self.transfer.state() != TransferState::Transmitting
            || self.isp_bytes_read >= self.image_size
            || self.cache_free() < self.chunk_size()
        {
            return;
        }
        hw.read_chunk();
        self.isp_read_in_progress = true;
        self.isp_bytes_read = self
            .isp_bytes_read
            .saturating_add(self.config.isp_chunk_size as u32);
    }

    /// Move cached bytes into the transfer engine while it has room.
    fn pump_image_data(&mut self, hw: &mut impl Board) -> error::Result<()> {
        let mut buf = [0u8; MAX_PACKET_LEN];
        loop {
            let n = self
                .transfer
                .max_push_size()
                .min(self.cache.used())
                .min(self.chunk_size())
                .min(buf.len());
            if n == 0 {
                return Ok(());
            }
            self.cache.pop(&mut buf[..n])?;
            self.transfer.push_image_data(&buf[..n], hw)?;
        }
    }

    // ── ISP control ───────────────────────────────────────────

    fn start_capture(&mut self, hw: &mut impl Board) {
        hw.capture();
        self.isp_powered = true;
        self.isp_idle = false;
        self.time_capture_start = hw.now_ms();
    }

    fn stop_isp(&mut self, hw: &mut impl Board) {
        if self.isp_powered {
            hw.power_down();
            self.isp_powered = false;
        }
        self.isp_idle = false;
        self.isp_read_in_progress = false;
    }

    fn reset_cache(&mut self) {
        self.cache.reset();
        self.isp_read_in_progress = false;
        self.isp_bytes_read = 0;
    }

    /// The device gives up on the current capture.
    fn fail_capture(&mut self, hw: &mut impl Board, sink: &mut impl EventSink) {
        if self.transfer.state().in_capture() {
            if let Err(e) = self.transfer.abort(AbortReason::AbortedByServer, hw) {
                warn!("Abort notification failed: {}", e);
            }
            if self.connected {
                hw.request_conn_params(ConnProfile::LowPower);
            }
        }
        self.stop_isp(hw);
        self.reset_cache();
        hw.set_activity(self.config.led_idle_duty);
        sink.emit(&AppEvent::CaptureFailed);
    }

    fn emit_transition(&self, before: TransferState, sink: &mut impl EventSink) {
        let after = self.transfer.state();
        if after != before {
            sink.emit(&AppEvent::TransferStateChanged {
                from: before,
                to: after,
            });
        }
    }
}
