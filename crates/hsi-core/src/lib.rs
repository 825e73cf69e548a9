//! `hsi-core`
//!
//! Core types and traits for the hyperspectral capture pipeline.
//!
//! This crate holds everything the acquisition context and the worker share:
//! the frame data model, the error taxonomy, the wait convention for blocking
//! calls, handles for deferred hardware operations, and the processing
//! pipeline with its collaborator seams.
//!
//! ## Key Types
//!
//! - [`Frame`]: One hyperspectral measurement with named image buffers
//! - [`AsyncHandle`]: Caller side of a deferred setting change or capture
//! - [`ProcessingPipeline`]: Reference management and capability gating
//! - [`CameraDevice`]: Seam between acquisition and a concrete driver
//! - [`HsiError`]: Error type for every fallible operation
//!
//! ## Example
//!
//! ```rust
//! use hsi_core::{CalibrationBundle, ProcessingPipeline, ProcessingSource, ProcessingMode};
//! use std::sync::Arc;
//!
//! let calibration = Arc::new(CalibrationBundle::new("factory"));
//! let pipeline = ProcessingPipeline::new(ProcessingSource::Calibration(calibration)).unwrap();
//! pipeline.set_processing_mode(ProcessingMode::DarkSubtract);
//! assert_eq!(pipeline.calibration_id(), "factory");
//! ```

pub mod calibration;
pub mod capability;
pub mod device;
pub mod error;
pub mod frame;
pub mod handle;
pub mod limits;
pub mod processing;
pub mod session;
pub mod sink;
pub mod wait;

pub use calibration::{Calibration, CalibrationBundle};
pub use capability::{Capability, CapabilitySet};
pub use device::{
    AtomicLinkState, CameraDevice, Channel, ComponentInfo, ComponentKind, ExposureRequest,
    LinkState, Setting,
};
pub use error::{HardwareError, HardwareErrorKind, HsiError, HsiResult};
pub use frame::{
    Frame, ImageBuffer, OperationMode, ProcessingMode, QualityFlag, SessionInfo, CUBE_BUFFER,
    RAW_BUFFER,
};
pub use handle::{pending, slot_pool, AsyncHandle, AsyncState, Completer, PendingOperation, SlotPool};
pub use processing::{
    CubeKernel, KernelInputs, LinearKernel, ProcessingArgs, ProcessingPipeline, ProcessingSource,
    ReferenceKind,
};
pub use session::{RecordedSession, SessionFile, SessionItemType};
pub use sink::{ExportSink, View, ViewSink};
pub use wait::Wait;
