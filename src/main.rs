//! CamSense firmware entry point
//!
//! Hexagonal architecture with an event-driven run loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BleGattAdapter   SimPeripherals   StatusLed    Esp32Time      │
//! │  (Radio+Link)     (ISP+env+motion) (LED)        (Clock)        │
//! │  NvsConfigStore   LogEventSink     EdgeInput (PIR, accel)      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │             CameraService (pure logic)                 │    │
//! │  │  RingBuffer · ImageTransfer · TriggerEngine · DFU      │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  EVENTS queue: BLE callbacks, ISP, sensors → run loop          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

// ── Imports ───────────────────────────────────────────────────
use anyhow::{Result, anyhow};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::ledc::{LedcDriver, LedcTimerDriver, config::TimerConfig};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::Hertz;
use log::{info, warn};

use camsense::adapters::ble_gatt::{BleGattAdapter, route};
use camsense::adapters::hardware::{CameraBoard, SimPeripherals};
use camsense::adapters::log_sink::LogEventSink;
use camsense::adapters::nvs::NvsConfigStore;
use camsense::adapters::time::Esp32TimeAdapter;
use camsense::app::ports::{ActivityLedPort, Clock, ConfigPort};
use camsense::app::service::CameraService;
use camsense::config::SystemConfig;
use camsense::drivers::motion_input::EdgeInput;
use camsense::drivers::status_led::StatusLed;
use camsense::events::{EVENTS, Event};

/// Image cache buffer size; the configured cache must fit inside it.
const IMAGE_CACHE_CAPACITY: usize = 8 * 1024;

/// Size of the synthetic frame the simulated ISP produces.
const SIM_IMAGE_SIZE: u32 = 24 * 1024;

/// Run-loop period and housekeeping tick interval.
const LOOP_PERIOD_MS: u32 = 10;
const TICK_INTERVAL_MS: u32 = 1_000;

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  CamSense v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsConfigStore::new(IMAGE_CACHE_CAPACITY)
        .map_err(|e| anyhow!("NVS init failed: {}", e))?;
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    };

    // ── 3. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take()?;

    let led_timer = LedcTimerDriver::new(
        peripherals.ledc.timer0,
        &TimerConfig::default().frequency(Hertz(5_000)),
    )?;
    let led_channel = LedcDriver::new(peripherals.ledc.channel0, &led_timer, peripherals.pins.gpio2)?;

    let mut pir = EdgeInput::pir(PinDriver::input(peripherals.pins.gpio4)?);
    let mut accel = EdgeInput::accel(PinDriver::input(peripherals.pins.gpio5)?);

    let mut board = CameraBoard::new(
        BleGattAdapter::new(config.device_name.clone()),
        StatusLed::new(led_channel),
        Esp32TimeAdapter::new(),
        SimPeripherals::new(usize::from(config.isp_chunk_size), SIM_IMAGE_SIZE),
    );
    let mut sink = LogEventSink::new();

    // ── 4. Application core ───────────────────────────────────
    let idle_duty = config.led_idle_duty;
    let mut app = CameraService::<IMAGE_CACHE_CAPACITY>::new(config)
        .map_err(|e| anyhow!("config rejected: {}", e))?;

    board.ble.start();
    board.set_activity(idle_duty);
    info!("Entering main event loop");

    // ── 5. Event loop ─────────────────────────────────────────
    let mut isp_buf = vec![0u8; usize::from(app.config().isp_chunk_size)];
    let mut last_tick = board.now_ms();

    loop {
        while let Some(event) = EVENTS.pop() {
            match event {
                Event::BleConnected => {
                    board.ble.on_connected();
                    app.on_connect(&mut board, &mut sink);
                    if let Err(e) = app.on_packet_size_changed(board.ble.packet_size(), &mut board) {
                        warn!("Initial packet size rejected: {}", e);
                    }
                }
                Event::BleDisconnected => {
                    board.ble.on_disconnected();
                    app.on_disconnect(&mut board, &mut sink);
                    pir.reset();
                    accel.reset();
                    if app.dfu_requested() {
                        info!("DFU armed, restarting into bootloader");
                        // SAFETY: plain FFI call; does not return.
                        unsafe { esp_idf_svc::sys::esp_restart() };
                    }
                }
                Event::GattRequestPending => {
                    while let Some(request) = board.ble.take_request() {
                        let result = route(&mut app, &request, &mut board, &mut sink);
                        board.ble.respond(&request, &result);
                    }
                }
                Event::NotifyComplete => {
                    while let Some((attribute, tag)) = board.ble.take_completion() {
                        app.on_notification_complete(attribute, tag, &mut board, &mut sink);
                    }
                }
                Event::PacketSizeChanged => {
                    if let Err(e) = app.on_packet_size_changed(board.ble.packet_size(), &mut board) {
                        warn!("Packet size change: {}", e);
                    }
                }
                Event::IspEventPending => {
                    while let Some(isp_event) = board.peripherals.take_isp_event(&mut isp_buf) {
                        app.on_isp_event(isp_event, &mut board, &mut sink);
                    }
                }
                Event::EnvSampleReady => {
                    if let Some(sample) = board.peripherals.take_env_sample() {
                        app.on_env_sample(sample, &mut board, &mut sink);
                    }
                }
                Event::PirMotionStart => app.on_pir_edge(true, &mut board, &mut sink),
                Event::PirMotionEnd => app.on_pir_edge(false, &mut board, &mut sink),
                Event::AccelMotion => app.on_accel_event(&mut board, &mut sink),
                Event::Tick => app.tick(&mut board),
            }
        }

        // ── Sensor polling ────────────────────────────────────
        let now = board.now_ms();
        board.peripherals.poll_env(now);
        if board.peripherals.pir_enabled() {
            pir.poll(&EVENTS);
        }
        if board.peripherals.accel_enabled() {
            accel.poll(&EVENTS);
        }

        if now.wrapping_sub(last_tick) >= TICK_INTERVAL_MS {
            last_tick = now;
            if !EVENTS.push(Event::Tick) {
                warn!("Main: event queue full, tick dropped");
            }
        }

        FreeRtos::delay_ms(LOOP_PERIOD_MS);
    }
}
