//! Consumers frames are handed to after processing.
//!
//! Export (persisting) and view (rendering) are external concerns; the
//! worker only needs these two seams. Each is called once per delivered frame.

use crate::error::HsiResult;
use crate::frame::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A sink that persists frames.
///
/// Examples: ENVI writer, TIFF writer, network uploader.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Persist one frame.
    async fn apply(&self, frame: &Frame) -> HsiResult<()>;

    /// Flush anything buffered. Called when the worker stops.
    async fn flush(&self) -> HsiResult<()> {
        Ok(())
    }
}

/// A rendered, display-ready image derived from a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub frame_name: String,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// 8-bit greyscale, row-major.
    pub pixels: Vec<u8>,
}

/// A sink that renders frames for display.
#[async_trait]
pub trait ViewSink: Send + Sync {
    async fn apply(&self, frame: &Frame) -> HsiResult<View>;
}
