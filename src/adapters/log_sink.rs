//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::info;

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Connected => info!("LINK | connected"),
            AppEvent::Disconnected => info!("LINK | disconnected"),
            AppEvent::TransferStateChanged { from, to } => {
                info!("TRANSFER | {} -> {}", from, to);
            }
            AppEvent::CaptureStarted(mode) => {
                info!("TRANSFER | capture started ({:?})", mode);
            }
            AppEvent::ImageCaptured { size, width, height } => {
                info!("TRANSFER | image {}x{} {} bytes", width, height, size);
            }
            AppEvent::CaptureFailed => info!("TRANSFER | capture failed"),
            AppEvent::TransferStats(s) => {
                info!(
                    "TRANSFER | done | power-up={}ms capture={}ms transfer={}ms | \
                     {} bytes @ {} B/s",
                    s.power_up_ms, s.capture_ms, s.transfer_ms, s.image_size, s.rate_bps,
                );
            }
            AppEvent::TriggerUpdated { id, enabled, settings } => {
                info!(
                    "TRIGGER | {} {} | value={:?} {:?} | time={:?} {}ms",
                    id.name(),
                    if *enabled { "on" } else { "off" },
                    settings.value_condition,
                    settings.boundaries,
                    settings.time_condition,
                    settings.time_interval_ms,
                );
            }
            AppEvent::TriggerNotified { id, value } => {
                info!("TRIGGER | {} notified value={}", id.name(), value);
            }
            AppEvent::EnvSamplingChanged(Some(ms)) => info!("ENV | sampling every {}ms", ms),
            AppEvent::EnvSamplingChanged(None) => info!("ENV | sampling stopped"),
            AppEvent::DfuArmed => info!("DFU | armed, dropping link"),
        }
    }
}
