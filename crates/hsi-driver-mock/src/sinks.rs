//! Export and view sinks for tests.

use async_trait::async_trait;
use hsi_core::{ExportSink, Frame, HsiError, HsiResult, View, ViewSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Export sink that remembers what it was given.
#[derive(Debug, Default)]
pub struct RecordingExporter {
    exported: Mutex<Vec<(String, u64)>>,
    delay: Option<Duration>,
    fail_on: Option<u64>,
    flushed: AtomicBool,
}

impl RecordingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every `apply`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the frame with this sequence number.
    #[must_use]
    pub fn failing_on(mut self, sequence: u64) -> Self {
        self.fail_on = Some(sequence);
        self
    }

    /// `(name, sequence)` of every exported frame, in export order.
    pub fn exported(&self) -> Vec<(String, u64)> {
        self.exported.lock().clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.exported.lock().iter().map(|(_, s)| *s).collect()
    }

    pub fn was_flushed(&self) -> bool {
        self.flushed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ExportSink for RecordingExporter {
    async fn apply(&self, frame: &Frame) -> HsiResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(frame.sequence()) {
            return Err(HsiError::Io(std::io::Error::other(format!(
                "export of '{}' failed",
                frame.name
            ))));
        }
        self.exported
            .lock()
            .push((frame.name.clone(), frame.sequence()));
        Ok(())
    }

    async fn flush(&self) -> HsiResult<()> {
        self.flushed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Renders the spectral mean of each pixel, scaled to 8 bits.
#[derive(Debug, Default)]
pub struct BandMeanViewer;

#[async_trait]
impl ViewSink for BandMeanViewer {
    async fn apply(&self, frame: &Frame) -> HsiResult<View> {
        let buffer = frame
            .cube()
            .or_else(|| frame.raw())
            .ok_or_else(|| HsiError::Processing(format!("frame '{}' has no image", frame.name)))?;

        let channels = buffer.channels.max(1) as usize;
        let means: Vec<f32> = buffer
            .data
            .chunks(channels)
            .map(|px| px.iter().sum::<f32>() / channels as f32)
            .collect();
        let peak = means.iter().copied().fold(0f32, f32::max);
        let scale = if peak > 0.0 { 255.0 / peak } else { 0.0 };

        Ok(View {
            frame_name: frame.name.clone(),
            sequence: frame.sequence(),
            width: buffer.width,
            height: buffer.height,
            pixels: means.iter().map(|m| (m * scale).round() as u8).collect(),
        })
    }
}
