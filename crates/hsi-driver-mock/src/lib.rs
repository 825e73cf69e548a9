//! Mock camera drivers for the hyperspectral capture pipeline.
//!
//! - [`MockCamera`]: synthetic scene with link, gate and error controls
//! - [`ReplayCamera`]: plays back a recorded session
//! - [`RecordingExporter`] and [`BandMeanViewer`]: sinks that record their input
//! - [`synthetic_session`]: small sessions with gaps and references
//!
//! All mocks run in [`MockMode::Instant`] unless configured otherwise, so
//! tests do not depend on wall-clock timing.

pub mod camera;
pub mod common;
pub mod pattern;
pub mod replay;
pub mod session;
pub mod sinks;

pub use camera::{MockCamera, MockCameraBuilder};
pub use common::{CameraOp, Fault, FaultPlan, MockMode, MockRng, TimingConfig};
pub use replay::ReplayCamera;
pub use session::synthetic_session;
pub use sinks::{BandMeanViewer, RecordingExporter};
