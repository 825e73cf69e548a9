//! Fault injection for mock cameras.
//!
//! A [`FaultPlan`] is consulted before every camera operation. Injected
//! faults surface as [`HardwareError`]s so callers see the same errors a
//! real camera would produce.

use super::rng::MockRng;
use hsi_core::{HardwareError, HardwareErrorKind};
use parking_lot::Mutex;
use std::sync::Arc;

/// Camera operations that can be faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraOp {
    /// Writing a setting to a component.
    Apply,
    /// Integrating and reading out one frame.
    Expose,
}

/// A single rule in a [`FaultPlan`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// `op` succeeds `allowed` times, then fails on every later call.
    Exhausts { op: CameraOp, allowed: u32 },
    /// `op` is refused by the device.
    Refuses(CameraOp),
    /// `op` never answers within the device deadline.
    Stalls(CameraOp),
    /// The link goes down on the next call of any operation.
    LinkDrop,
    /// The sensor latches `code` on the next call of any operation.
    SensorFault(u32),
    /// Any operation fails with probability `rate`.
    Random { rate: f64 },
}

#[derive(Debug, Default)]
struct Latches {
    calls: [u32; 2],
    link_down: bool,
    fault_code: Option<u32>,
}

/// Ordered set of [`Fault`]s plus the latched device condition they cause.
///
/// Clones share their latches, so a plan handed to a camera can still be
/// cleared from a test.
#[derive(Clone, Debug)]
pub struct FaultPlan {
    rules: Arc<[Fault]>,
    rng: Arc<MockRng>,
    latches: Arc<Mutex<Latches>>,
}

impl FaultPlan {
    /// A plan that never faults.
    pub fn healthy() -> Self {
        Self::from_rules(Vec::new(), None)
    }

    pub fn with(fault: Fault) -> Self {
        Self::from_rules(vec![fault], None)
    }

    /// Build a plan whose random faults draw from a fixed seed.
    pub fn from_rules(rules: Vec<Fault>, seed: Option<u64>) -> Self {
        Self {
            rules: rules.into(),
            rng: Arc::new(MockRng::new(seed)),
            latches: Arc::new(Mutex::new(Latches::default())),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run `op` on `component` through the plan.
    pub fn check(&self, component: &str, op: CameraOp) -> Result<(), HardwareError> {
        let mut latches = self.latches.lock();
        latches.calls[op as usize] += 1;
        let calls = latches.calls[op as usize];

        let raise = |kind, message: String| Err(HardwareError::new(component, kind, message));

        if latches.link_down {
            return raise(HardwareErrorKind::Communication, "link is down".into());
        }
        if let Some(code) = latches.fault_code {
            return raise(HardwareErrorKind::Fault, format!("sensor fault code {}", code));
        }

        for rule in self.rules.iter() {
            match *rule {
                Fault::Exhausts { op: target, allowed } if target == op && calls > allowed => {
                    return raise(
                        HardwareErrorKind::Fault,
                        format!("{:?} exhausted after {} calls", op, allowed),
                    );
                }
                Fault::Refuses(target) if target == op => {
                    return raise(HardwareErrorKind::Rejected, format!("{:?} refused", op));
                }
                Fault::Stalls(target) if target == op => {
                    return raise(HardwareErrorKind::Timeout, format!("{:?} did not answer", op));
                }
                Fault::LinkDrop => {
                    latches.link_down = true;
                    return raise(HardwareErrorKind::Communication, "link is down".into());
                }
                Fault::SensorFault(code) => {
                    latches.fault_code = Some(code);
                    return raise(HardwareErrorKind::Fault, format!("sensor fault code {}", code));
                }
                Fault::Random { rate } if self.rng.should_fail(rate) => {
                    return raise(HardwareErrorKind::Fault, format!("{:?} glitched", op));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Forget call counts and clear a dropped link or latched fault.
    pub fn clear(&self) {
        *self.latches.lock() = Latches::default();
    }
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self::healthy()
    }
}
