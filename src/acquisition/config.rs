//! Acquisition configuration.

use hsi_core::limits::{
    DEFAULT_DRIVER_QUEUE, DEFAULT_HARDWARE_QUEUE, DEFAULT_INGEST_QUEUE, DEFAULT_PENDING_SLOTS,
    LINK_POLL_INTERVAL, MIN_FPS,
};
use hsi_core::{HsiError, HsiResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Buffering and timing for an [`AcquisitionContext`](super::AcquisitionContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Capacity of the hardware stage (frames the device buffers)
    #[serde(default = "default_hardware_queue")]
    pub hardware_queue: usize,
    /// Capacity of the driver stage
    #[serde(default = "default_driver_queue")]
    pub driver_queue: usize,
    /// Capacity of the ingest stage the worker reads from
    #[serde(default = "default_ingest_queue")]
    pub ingest_queue: usize,
    /// Link monitor poll period in milliseconds
    #[serde(default = "default_link_poll")]
    pub link_poll_interval_ms: u64,
    /// Maximum outstanding asynchronous operations
    #[serde(default = "default_pending_slots")]
    pub pending_slots: usize,
    #[serde(default = "default_integration_time")]
    pub integration_time_ms: f64,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

fn default_hardware_queue() -> usize {
    DEFAULT_HARDWARE_QUEUE
}

fn default_driver_queue() -> usize {
    DEFAULT_DRIVER_QUEUE
}

fn default_ingest_queue() -> usize {
    DEFAULT_INGEST_QUEUE
}

fn default_link_poll() -> u64 {
    LINK_POLL_INTERVAL.as_millis() as u64
}

fn default_pending_slots() -> usize {
    DEFAULT_PENDING_SLOTS
}

fn default_integration_time() -> f64 {
    10.0
}

fn default_fps() -> f64 {
    10.0
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            hardware_queue: default_hardware_queue(),
            driver_queue: default_driver_queue(),
            ingest_queue: default_ingest_queue(),
            link_poll_interval_ms: default_link_poll(),
            pending_slots: default_pending_slots(),
            integration_time_ms: default_integration_time(),
            fps: default_fps(),
        }
    }
}

impl AcquisitionConfig {
    pub fn link_poll_interval(&self) -> Duration {
        Duration::from_millis(self.link_poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> HsiResult<()> {
        for (name, value) in [
            ("hardware_queue", self.hardware_queue),
            ("driver_queue", self.driver_queue),
            ("ingest_queue", self.ingest_queue),
            ("pending_slots", self.pending_slots),
        ] {
            if value == 0 {
                return Err(HsiError::Configuration(format!(
                    "acquisition.{} must be at least 1",
                    name
                )));
            }
        }
        if !(self.integration_time_ms.is_finite() && self.integration_time_ms > 0.0) {
            return Err(HsiError::Configuration(format!(
                "Invalid integration_time_ms {}",
                self.integration_time_ms
            )));
        }
        if !(self.fps.is_finite() && self.fps >= MIN_FPS) {
            return Err(HsiError::Configuration(format!("Invalid fps {}", self.fps)));
        }
        Ok(())
    }
}
