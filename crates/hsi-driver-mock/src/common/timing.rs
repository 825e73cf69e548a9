//! Timing configuration for timed modes.

use std::time::Duration;

/// Hardware-like delays of a simulated camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Sensor readout after each exposure, in milliseconds.
    pub readout_ms: u64,
    /// Time for a setting change to take effect, in milliseconds.
    pub settle_ms: u64,
    /// Round-trip delay of every device call, in milliseconds.
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// A push-broom camera reading out at roughly 30 fps.
    pub fn camera() -> Self {
        Self {
            readout_ms: 33,
            settle_ms: 5,
            communication_delay_ms: 2,
        }
    }

    /// Short delays for integration tests that need time to pass.
    pub fn fast() -> Self {
        Self {
            readout_ms: 2,
            settle_ms: 1,
            communication_delay_ms: 0,
        }
    }

    pub fn readout(&self) -> Duration {
        Duration::from_millis(self.readout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn communication(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }
}
