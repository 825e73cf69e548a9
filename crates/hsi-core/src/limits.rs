//! Shared limits and defaults for the capture pipeline.
//!
//! This module centralizes:
//! - Payload size limits for image buffers
//! - Queue depth and timing defaults for the worker and acquisition stages

use crate::error::HsiError;
use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default period the worker re-polls an empty source (5 ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long a blocked output-queue push waits for consumer progress before
/// the result is discarded with `ResourceExhausted`.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for draining in-flight frames when a worker stops.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between hardware link probes.
pub const LINK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long a synchronous setter waits for hardware acknowledgement.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest gap between frames in continuous capture.
pub const MAX_FRAME_PERIOD: Duration = Duration::from_secs(3600);

/// Slowest accepted frame rate, one frame per [`MAX_FRAME_PERIOD`].
pub const MIN_FPS: f64 = 1.0 / 3600.0;

/// Poll period of the result-callback consumer.
pub const CALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// Queue Defaults
// =============================================================================

/// Default enforced depth of the worker output queue.
pub const DEFAULT_HARD_LIMIT: usize = 100;

/// Default advisory depth of the worker output queue.
pub const DEFAULT_SOFT_LIMIT: usize = 90;

/// Default depth of the hardware-level frame buffer.
pub const DEFAULT_HARDWARE_QUEUE: usize = 20;

/// Default depth of the driver-level frame buffer.
pub const DEFAULT_DRIVER_QUEUE: usize = 10;

/// Default depth of the acquisition ingest queue.
pub const DEFAULT_INGEST_QUEUE: usize = 10;

const _: () = assert!(DEFAULT_SOFT_LIMIT <= DEFAULT_HARD_LIMIT);

/// Default number of asynchronous operations that may be outstanding.
pub const DEFAULT_PENDING_SLOTS: usize = 64;

/// Upper bound on configured processing workers.
pub const MAX_WORKER_COUNT: usize = 64;

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum allowed buffer payload in bytes (default: 512MB).
pub const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;
/// Maximum supported width/height for image buffers.
pub const MAX_FRAME_DIMENSION: u32 = 16_384;
/// Maximum number of spectral channels per buffer.
pub const MAX_CHANNELS: u32 = 4_096;

/// Validated buffer sizing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub samples: usize,
    pub bytes: usize,
}

/// Validate cube dimensions and calculate sample/byte sizes safely.
pub fn validate_frame_size(
    width: u32,
    height: u32,
    channels: u32,
) -> Result<FrameSize, HsiError> {
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(HsiError::FrameDimensionsTooLarge {
            width,
            height,
            max_dimension: MAX_FRAME_DIMENSION,
        });
    }
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(HsiError::Configuration(format!(
            "channel count {} outside 1..={}",
            channels, MAX_CHANNELS
        )));
    }

    let samples = (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(channels as usize))
        .ok_or(HsiError::SizeOverflow {
            context: "cube sample count",
        })?;

    let bytes = samples
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or(HsiError::SizeOverflow {
            context: "cube byte size",
        })?;

    if bytes > MAX_FRAME_BYTES {
        return Err(HsiError::FrameTooLarge {
            bytes,
            max_bytes: MAX_FRAME_BYTES,
        });
    }

    Ok(FrameSize { samples, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cube() {
        let size = validate_frame_size(64, 32, 10).unwrap();
        assert_eq!(size.samples, 64 * 32 * 10);
        assert_eq!(size.bytes, 64 * 32 * 10 * 4);
    }

    #[test]
    fn test_oversized_dimension() {
        let err = validate_frame_size(MAX_FRAME_DIMENSION + 1, 1, 1).unwrap_err();
        assert!(matches!(err, HsiError::FrameDimensionsTooLarge { .. }));
    }

    #[test]
    fn test_oversized_payload() {
        let err = validate_frame_size(16_384, 16_384, 1_000).unwrap_err();
        assert!(matches!(err, HsiError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_zero_channels_rejected() {
        assert!(validate_frame_size(8, 8, 0).is_err());
    }
}
