//! Shared plumbing for the mock cameras: timing, noise and fault injection.

mod faults;
mod mode;
mod rng;
mod timing;

pub use faults::{CameraOp, Fault, FaultPlan};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
