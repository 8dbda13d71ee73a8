//! System configuration parameters
//!
//! All tunable parameters for the camera sensor.
//! Values can be overridden via NVS (non-volatile storage).

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Advertised name capacity in bytes.
pub const DEVICE_NAME_CAP: usize = 24;

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Image path ---
    /// Bytes fetched from the ISP per read command
    pub isp_chunk_size: u16,
    /// Image cache size in ISP chunks
    pub image_cache_chunks: u8,

    // --- Environmental sensor ---
    /// Default temperature/humidity sampling period (milliseconds)
    pub env_sample_period_ms: u32,

    // --- Triggers ---
    /// Send time-gated trigger notifications once the gate opens
    pub retry_deferred_notifications: bool,

    // --- Activity LED (duty out of 255) ---
    pub led_idle_duty: u8,
    pub led_capture_duty: u8,
    pub led_transfer_duty: u8,
    pub led_dfu_duty: u8,

    // --- Identity ---
    pub device_name: String<DEVICE_NAME_CAP>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut device_name = String::new();
        let _ = device_name.push_str("CamSense");
        Self {
            // Image path
            isp_chunk_size: 1024,
            image_cache_chunks: 8, // 8 KiB cache

            // Environmental sensor
            env_sample_period_ms: 10_000,

            // Triggers
            retry_deferred_notifications: false,

            // LED
            led_idle_duty: 3,
            led_capture_duty: 10,
            led_transfer_duty: 20,
            led_dfu_duty: 128,

            device_name,
        }
    }
}

impl SystemConfig {
    /// Image cache size in bytes.
    pub fn image_cache_bytes(&self) -> usize {
        self.isp_chunk_size as usize * self.image_cache_chunks as usize
    }

    /// Range-check every field.
    ///
    /// `ring_capacity` is the compile-time size of the image cache buffer the
    /// configuration will run against.
    pub fn validate(&self, ring_capacity: usize) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&self.isp_chunk_size) {
            return Err(ConfigError::ValidationFailed(
                "isp_chunk_size must be 64–4096",
            ));
        }
        if self.image_cache_chunks < 2 {
            return Err(ConfigError::ValidationFailed(
                "image_cache_chunks must be at least 2",
            ));
        }
        if self.image_cache_bytes() > ring_capacity {
            return Err(ConfigError::ValidationFailed(
                "image cache exceeds ring buffer capacity",
            ));
        }
        if !(1_000..=3_600_000).contains(&self.env_sample_period_ms) {
            return Err(ConfigError::ValidationFailed(
                "env_sample_period_ms must be 1000–3600000",
            ));
        }
        if self.device_name.is_empty() {
            return Err(ConfigError::ValidationFailed("device_name must not be empty"));
        }
        Ok(())
    }
}
