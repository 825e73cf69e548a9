//! Camera device abstraction.
//!
//! [`CameraDevice`] is the seam between the acquisition context and a
//! concrete driver. The acquisition context polls link state, dispatches
//! setting changes and exposures, and owns all buffering; a device only
//! talks to hardware.

use crate::error::HardwareError;
use crate::frame::{ImageBuffer, OperationMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Aggregate connectivity of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    /// Every component is reachable.
    Online,
    /// Some but not all components are reachable.
    PartiallyOnline,
    /// No component is reachable.
    Offline,
}

impl LinkState {
    /// Derive the aggregate state from per-component reachability.
    #[must_use]
    pub fn from_components(online: &[bool]) -> Self {
        let up = online.iter().filter(|&&o| o).count();
        match up {
            0 => LinkState::Offline,
            n if n == online.len() => LinkState::Online,
            _ => LinkState::PartiallyOnline,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            LinkState::Online => 0,
            LinkState::PartiallyOnline => 1,
            LinkState::Offline => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => LinkState::Online,
            1 => LinkState::PartiallyOnline,
            _ => LinkState::Offline,
        }
    }
}

/// Atomically readable link state.
#[derive(Debug)]
pub struct AtomicLinkState(std::sync::atomic::AtomicU8);

impl AtomicLinkState {
    pub fn new(state: LinkState) -> Self {
        Self(std::sync::atomic::AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> LinkState {
        LinkState::from_u8(self.0.load(std::sync::atomic::Ordering::Acquire))
    }

    /// Store `state`, returning the previous value.
    pub fn swap(&self, state: LinkState) -> LinkState {
        LinkState::from_u8(self.0.swap(state.as_u8(), std::sync::atomic::Ordering::AcqRel))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    ImageSensor,
    SecondaryImageSensor,
    MiscSensor,
}

/// Static description of one camera component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub id: usize,
    pub name: String,
    pub kind: ComponentKind,
    pub sensor_info: String,
    pub pixel_format: String,
}

/// A setting change dispatched to the hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Setting {
    OperationMode(OperationMode),
    IntegrationTime(f64),
    IntegrationTimeFactor { component: usize, factor: f64 },
    Fps(f64),
    Gain { component: usize, value: f64 },
    AutoExposure(bool),
    Average(u32),
    Continuous(bool),
    PreviewMode(bool),
}

/// Key under which the hardware tracks its latest pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    OperationMode,
    IntegrationTime,
    IntegrationTimeFactor(usize),
    Fps,
    Gain(usize),
    AutoExposure,
    Average,
    Continuous,
    PreviewMode,
    Capture,
}

impl Setting {
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Setting::OperationMode(_) => Channel::OperationMode,
            Setting::IntegrationTime(_) => Channel::IntegrationTime,
            Setting::IntegrationTimeFactor { component, .. } => Channel::IntegrationTimeFactor(*component),
            Setting::Fps(_) => Channel::Fps,
            Setting::Gain { component, .. } => Channel::Gain(*component),
            Setting::AutoExposure(_) => Channel::AutoExposure,
            Setting::Average(_) => Channel::Average,
            Setting::Continuous(_) => Channel::Continuous,
            Setting::PreviewMode(_) => Channel::PreviewMode,
        }
    }

    /// Short operation name for logs and handles.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Setting::OperationMode(_) => "set_operation_mode",
            Setting::IntegrationTime(_) => "set_integration_time",
            Setting::IntegrationTimeFactor { .. } => "set_integration_time_factor",
            Setting::Fps(_) => "set_fps",
            Setting::Gain { .. } => "set_gain",
            Setting::AutoExposure(_) => "set_auto_exposure",
            Setting::Average(_) => "set_average",
            Setting::Continuous(_) => "set_continuous",
            Setting::PreviewMode(_) => "set_preview_mode",
        }
    }
}

/// Parameters for a single exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRequest {
    pub integration_time_ms: f64,
    pub averages: u32,
    pub preview: bool,
    pub operation_mode: OperationMode,
}

/// A hyperspectral camera as seen by the acquisition context.
#[async_trait]
pub trait CameraDevice: Send + Sync + Debug {
    /// Product name stamped on frames.
    fn product_name(&self) -> &str;

    fn serial_number(&self) -> Option<&str> {
        None
    }

    /// Components in id order.
    fn components(&self) -> Vec<ComponentInfo>;

    /// Probe reachability of each component, in id order.
    async fn poll_link(&self) -> Vec<bool>;

    /// Apply a setting. Resolves when the hardware acknowledges.
    async fn apply(&self, setting: &Setting) -> Result<(), HardwareError>;

    /// Take one exposure and return the sensor cube.
    async fn expose(&self, request: &ExposureRequest) -> Result<ImageBuffer, HardwareError>;

    /// Temperature of a component in degrees Celsius, if it has a sensor.
    fn temperature(&self, component: usize) -> Option<f64>;
}
