//! The three cascaded buffering stages and acquisition counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Where a frame sits between the sensor and the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Frames read off the sensor. Overflow here loses frames.
    Hardware,
    /// Frames handed from the device to the driver.
    Driver,
    /// Frames ready for the consumer.
    Ingest,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Hardware, Stage::Driver, Stage::Ingest];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Hardware => "hardware",
            Stage::Driver => "driver",
            Stage::Ingest => "ingest",
        }
    }
}

/// Depth of one stage at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub capacity: usize,
    pub used: usize,
}

impl StageStatus {
    pub fn is_full(&self) -> bool {
        self.used >= self.capacity
    }
}

/// Snapshot of [`AcquisitionCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionStats {
    /// Frames read off the sensor, including lost ones
    pub frames_produced: u64,
    /// Frames discarded because the hardware stage was full
    pub frames_lost: u64,
    /// Runs of consecutive lost frames
    pub discontinuities: u64,
    /// Exposures the device failed
    pub hardware_errors: u64,
    /// Queued requests replaced by a newer one on the same channel
    pub overwritten: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AcquisitionCounters {
    pub produced: AtomicU64,
    pub lost: AtomicU64,
    pub discontinuities: AtomicU64,
    pub hardware_errors: AtomicU64,
    pub overwritten: AtomicU64,
}

impl AcquisitionCounters {
    pub fn snapshot(&self) -> AcquisitionStats {
        AcquisitionStats {
            frames_produced: self.produced.load(Ordering::Relaxed),
            frames_lost: self.lost.load(Ordering::Relaxed),
            discontinuities: self.discontinuities.load(Ordering::Relaxed),
            hardware_errors: self.hardware_errors.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
        }
    }

    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
