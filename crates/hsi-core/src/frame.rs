//! Frame data model.
//!
//! A [`Frame`] is one hyperspectral measurement: identity and session stamp,
//! acquisition metadata, quality flags, and one or more named image buffers
//! each carrying its own wavelength axis.

use crate::error::{HsiError, HsiResult};
use crate::limits::validate_frame_size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Key of the sensor data buffer.
pub const RAW_BUFFER: &str = "raw";
/// Key of the buffer produced by the processing pipeline.
pub const CUBE_BUFFER: &str = "cube";

// =============================================================================
// Enumerations
// =============================================================================

/// Processing stage a frame has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Fast, reduced-quality rendering for live display.
    Preview,
    /// Sensor data only.
    #[default]
    Raw,
    /// Raw minus the dark reference.
    DarkSubtract,
    /// Dark-corrected data normalised by the white reference.
    Reflectance,
    /// Dark-corrected data scaled to physical radiance units.
    SpectralRadiance,
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProcessingMode::Preview => "Preview",
            ProcessingMode::Raw => "Raw",
            ProcessingMode::DarkSubtract => "DarkSubtract",
            ProcessingMode::Reflectance => "Reflectance",
            ProcessingMode::SpectralRadiance => "SpectralRadiance",
        };
        write!(f, "{}", label)
    }
}

/// Trigger source of the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperationMode {
    /// Frames are triggered by an external signal.
    External,
    /// The camera free-runs at its configured frame rate.
    #[default]
    Internal,
    /// Frames are triggered by software capture requests.
    Software,
    Undefined,
}

/// Warning tags attached to a frame during capture or processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityFlag {
    PoorReference,
    OverIlluminated,
    PoorWhiteBalancing,
    DarkIntegrationTime,
    DarkTemperature,
    WhiteIntegrationTime,
    WhiteTemperature,
    WhiteDarkIntegrationTime,
    WhiteDarkTemperature,
}

// =============================================================================
// Session stamp
// =============================================================================

/// Session identity stamped onto every captured frame.
///
/// Downstream consumers use `(name, session_number)` as the resequencing key
/// and `sequence_number` as the position within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub session_number: u32,
    pub sequence_number: u64,
}

impl SessionInfo {
    pub fn new(name: impl Into<String>, session_number: u32, sequence_number: u64) -> Self {
        Self {
            name: name.into(),
            session_number,
            sequence_number,
        }
    }

    /// Whether two stamps belong to the same sequence.
    #[must_use]
    pub fn same_session(&self, other: &SessionInfo) -> bool {
        self.name == other.name && self.session_number == other.session_number
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new("auto", 0, 0)
    }
}

// =============================================================================
// Image buffers
// =============================================================================

/// A band-interleaved-by-pixel image cube.
///
/// `data` holds `width * height * channels` samples; sample `(x, y, c)` is at
/// `(y * width + x) * channels + c`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub wavelengths_nm: Vec<f64>,
    pub data: Vec<f32>,
}

impl ImageBuffer {
    /// Build a buffer, checking the payload against its declared geometry.
    pub fn new(
        width: u32,
        height: u32,
        wavelengths_nm: Vec<f64>,
        data: Vec<f32>,
    ) -> HsiResult<Self> {
        let channels = u32::try_from(wavelengths_nm.len()).map_err(|_| HsiError::SizeOverflow {
            context: "channel count",
        })?;
        let size = validate_frame_size(width, height, channels)?;
        if data.len() != size.samples {
            return Err(HsiError::Configuration(format!(
                "buffer holds {} samples, {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                size.samples
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            wavelengths_nm,
            data,
        })
    }

    /// A buffer with every sample set to `value`.
    pub fn filled(width: u32, height: u32, wavelengths_nm: Vec<f64>, value: f32) -> HsiResult<Self> {
        let channels = u32::try_from(wavelengths_nm.len()).map_err(|_| HsiError::SizeOverflow {
            context: "channel count",
        })?;
        let size = validate_frame_size(width, height, channels)?;
        Self::new(width, height, wavelengths_nm, vec![value; size.samples])
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32, channel: u32) -> Option<f32> {
        if x >= self.width || y >= self.height || channel >= self.channels {
            return None;
        }
        let idx = ((y as usize * self.width as usize) + x as usize) * self.channels as usize
            + channel as usize;
        self.data.get(idx).copied()
    }

    /// Whether `other` has identical width, height and channel count.
    #[must_use]
    pub fn same_geometry(&self, other: &ImageBuffer) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| f64::from(v)).sum::<f64>() / self.data.len() as f64
    }

    /// Mean of one spectral band.
    #[must_use]
    pub fn band_mean(&self, channel: u32) -> Option<f64> {
        if channel >= self.channels {
            return None;
        }
        let stride = self.channels as usize;
        let (sum, n) = self
            .data
            .iter()
            .skip(channel as usize)
            .step_by(stride)
            .fold((0.0f64, 0usize), |(s, n), &v| (s + f64::from(v), n + 1));
        Some(if n == 0 { 0.0 } else { sum / n as f64 })
    }

    #[must_use]
    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::MIN, f32::max)
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

// =============================================================================
// Frame
// =============================================================================

/// One captured or processed hyperspectral measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    pub session: SessionInfo,
    pub capture_time: DateTime<Utc>,
    pub integration_time_ms: f64,
    pub processing_mode: ProcessingMode,
    pub operation_mode: OperationMode,
    pub averages: u32,
    pub flags: BTreeSet<QualityFlag>,
    pub buffers: BTreeMap<String, ImageBuffer>,
    pub calibration_id: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub distance_mm: Option<f64>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl Frame {
    /// A raw frame wrapping sensor data.
    pub fn new(name: impl Into<String>, session: SessionInfo, raw: ImageBuffer) -> Self {
        let mut buffers = BTreeMap::new();
        buffers.insert(RAW_BUFFER.to_string(), raw);
        Self::with_buffers(name.into(), session, buffers)
    }

    fn with_buffers(
        name: String,
        session: SessionInfo,
        buffers: BTreeMap<String, ImageBuffer>,
    ) -> Self {
        Self {
            name,
            session,
            capture_time: Utc::now(),
            integration_time_ms: 0.0,
            processing_mode: ProcessingMode::Raw,
            operation_mode: OperationMode::default(),
            averages: 1,
            flags: BTreeSet::new(),
            buffers,
            calibration_id: None,
            comment: None,
            distance_mm: None,
            product_name: None,
            serial_number: None,
        }
    }

    /// Placeholder for a frame the hardware announced but never delivered.
    ///
    /// Recorded sessions keep these so that `AllFrames` indexing matches the
    /// original sequence numbering.
    pub fn dropped(name: impl Into<String>, session: SessionInfo) -> Self {
        Self::with_buffers(name.into(), session, BTreeMap::new())
    }

    #[must_use]
    pub fn with_integration_time(mut self, ms: f64) -> Self {
        self.integration_time_ms = ms;
        self
    }

    #[must_use]
    pub fn with_calibration(mut self, id: impl Into<String>) -> Self {
        self.calibration_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.session.sequence_number
    }

    /// True for placeholders created by [`Frame::dropped`].
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.buffers.is_empty()
    }

    #[must_use]
    pub fn raw(&self) -> Option<&ImageBuffer> {
        self.buffers.get(RAW_BUFFER)
    }

    #[must_use]
    pub fn cube(&self) -> Option<&ImageBuffer> {
        self.buffers.get(CUBE_BUFFER)
    }

    #[must_use]
    pub fn buffer(&self, key: &str) -> Option<&ImageBuffer> {
        self.buffers.get(key)
    }

    /// Attach or replace a named buffer.
    pub fn insert_buffer(&mut self, key: impl Into<String>, buffer: ImageBuffer) {
        self.buffers.insert(key.into(), buffer);
    }

    #[must_use]
    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Total payload across all buffers.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.buffers.values().map(ImageBuffer::byte_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wavelengths(n: usize) -> Vec<f64> {
        (0..n).map(|i| 450.0 + 10.0 * i as f64).collect()
    }

    #[test]
    fn test_buffer_rejects_wrong_payload() {
        let err = ImageBuffer::new(4, 4, wavelengths(3), vec![0.0; 10]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_buffer_indexing() {
        let data: Vec<f32> = (0..2 * 2 * 3).map(|v| v as f32).collect();
        let buf = ImageBuffer::new(2, 2, wavelengths(3), data).unwrap();
        // pixel (1, 1) starts at sample (1 * 2 + 1) * 3 = 9
        assert_eq!(buf.get(1, 1, 0), Some(9.0));
        assert_eq!(buf.get(1, 1, 2), Some(11.0));
        assert_eq!(buf.get(2, 0, 0), None);
        assert_eq!(buf.band_mean(0), Some((0.0 + 3.0 + 6.0 + 9.0) / 4.0));
    }

    #[test]
    fn test_frame_defaults() {
        let raw = ImageBuffer::filled(2, 2, wavelengths(2), 1.0).unwrap();
        let frame = Frame::new("m0", SessionInfo::default(), raw);
        assert_eq!(frame.processing_mode, ProcessingMode::Raw);
        assert_eq!(frame.session.name, "auto");
        assert!(frame.raw().is_some());
        assert!(frame.cube().is_none());
        assert!(!frame.is_dropped());
        assert_eq!(frame.byte_len(), 2 * 2 * 2 * 4);
    }

    #[test]
    fn test_dropped_placeholder() {
        let frame = Frame::dropped("gap", SessionInfo::new("run", 1, 7));
        assert!(frame.is_dropped());
        assert!(frame.raw().is_none());
        assert_eq!(frame.sequence(), 7);
    }

    #[test]
    fn test_session_key() {
        let a = SessionInfo::new("run", 1, 1);
        let b = SessionInfo::new("run", 1, 9);
        let c = SessionInfo::new("run", 2, 1);
        assert!(a.same_session(&b));
        assert!(!a.same_session(&c));
    }

    #[test]
    fn test_frame_json_roundtrip_keeps_flags() {
        let raw = ImageBuffer::filled(1, 1, wavelengths(1), 3.0).unwrap();
        let mut frame = Frame::new("m1", SessionInfo::default(), raw);
        frame.flags.insert(QualityFlag::OverIlluminated);
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert!(back.has_flag(QualityFlag::OverIlluminated));
    }
}
