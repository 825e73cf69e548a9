//! Operational modes for mock devices.
//!
//! - **Instant**: Zero delays, deterministic behavior for unit tests
//! - **Realistic**: Exposure and readout take wall-clock time
//! - **Chaos**: Realistic timing plus sensor noise, for resilience testing

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays, noise-free frames
    #[default]
    Instant,
    /// Hardware-like timing
    Realistic,
    /// Hardware-like timing with noisy frames
    Chaos,
}

impl MockMode {
    /// Whether operations should sleep to imitate hardware.
    pub fn is_timed(self) -> bool {
        !matches!(self, MockMode::Instant)
    }

    /// Whether frames get random noise.
    pub fn is_noisy(self) -> bool {
        matches!(self, MockMode::Chaos)
    }
}
