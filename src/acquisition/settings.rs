//! Last acknowledged value of every camera setting.

use hsi_core::limits::MIN_FPS;
use hsi_core::{HsiError, HsiResult, OperationMode, Setting};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SettingsState {
    pub operation_mode: OperationMode,
    pub integration_time_ms: f64,
    pub fps: f64,
    pub auto_exposure: bool,
    pub average: u32,
    pub continuous: bool,
    pub preview_mode: bool,
    pub gains: Vec<f64>,
    pub factors: Vec<f64>,
}

impl SettingsState {
    pub fn new(components: usize, integration_time_ms: f64, fps: f64) -> Self {
        Self {
            operation_mode: OperationMode::default(),
            integration_time_ms,
            fps,
            auto_exposure: false,
            average: 1,
            continuous: false,
            preview_mode: false,
            gains: vec![1.0; components],
            factors: vec![1.0; components],
        }
    }

    /// Record a setting the device acknowledged.
    pub fn record(&mut self, setting: &Setting) {
        match *setting {
            Setting::OperationMode(mode) => self.operation_mode = mode,
            Setting::IntegrationTime(ms) => self.integration_time_ms = ms,
            Setting::IntegrationTimeFactor { component, factor } => {
                if let Some(f) = self.factors.get_mut(component) {
                    *f = factor;
                }
            }
            Setting::Fps(fps) => self.fps = fps,
            Setting::Gain { component, value } => {
                if let Some(g) = self.gains.get_mut(component) {
                    *g = value;
                }
            }
            Setting::AutoExposure(on) => self.auto_exposure = on,
            Setting::Average(n) => self.average = n,
            Setting::Continuous(on) => self.continuous = on,
            Setting::PreviewMode(on) => self.preview_mode = on,
        }
    }
}

/// Reject values no device accepts before they reach the command queue.
pub(crate) fn validate(setting: &Setting, components: usize) -> HsiResult<()> {
    let positive = |name: &str, v: f64| {
        if v.is_finite() && v > 0.0 {
            Ok(())
        } else {
            Err(HsiError::Configuration(format!("Invalid {} {}", name, v)))
        }
    };
    let component_exists = |id: usize| {
        if id < components {
            Ok(())
        } else {
            Err(HsiError::Configuration(format!(
                "Component {} does not exist ({} components)",
                id, components
            )))
        }
    };
    match *setting {
        Setting::OperationMode(OperationMode::Undefined) => Err(HsiError::Configuration(
            "Operation mode Undefined cannot be set".into(),
        )),
        Setting::IntegrationTime(ms) => positive("integration time", ms),
        Setting::Fps(fps) => {
            positive("fps", fps)?;
            if fps < MIN_FPS {
                return Err(HsiError::Configuration(format!(
                    "fps {} is below the minimum of {}",
                    fps, MIN_FPS
                )));
            }
            Ok(())
        }
        Setting::Average(0) => Err(HsiError::Configuration(
            "Average must be at least 1".into(),
        )),
        Setting::Gain { component, value } => {
            component_exists(component)?;
            positive("gain", value)
        }
        Setting::IntegrationTimeFactor { component, factor } => {
            component_exists(component)?;
            positive("integration time factor", factor)
        }
        _ => Ok(()),
    }
}
