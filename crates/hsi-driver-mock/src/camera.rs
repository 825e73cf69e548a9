//! Simulated hyperspectral camera.

use crate::common::{CameraOp, FaultPlan, MockMode, MockRng, TimingConfig};
use crate::pattern::{spectral_scene, wavelength_axis};
use async_trait::async_trait;
use hsi_core::{
    CameraDevice, ComponentInfo, ComponentKind, ExposureRequest, HardwareError, HardwareErrorKind,
    ImageBuffer, Setting,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

// =============================================================================
// MockCameraBuilder
// =============================================================================

/// Builder for [`MockCamera`]
pub struct MockCameraBuilder {
    width: u32,
    height: u32,
    wavelengths_nm: Vec<f64>,
    components: Vec<ComponentInfo>,
    mode: MockMode,
    faults: FaultPlan,
    timing_config: TimingConfig,
    initial_temperature: f64,
    product_name: String,
    serial_number: Option<String>,
    seed: Option<u64>,
}

impl MockCameraBuilder {
    pub fn new(width: u32, height: u32, channels: usize) -> Self {
        Self {
            width,
            height,
            wavelengths_nm: wavelength_axis(450.0, 850.0, channels),
            components: vec![
                ComponentInfo {
                    id: 0,
                    name: "hsi_sensor".into(),
                    kind: ComponentKind::ImageSensor,
                    sensor_info: format!("{}x{}x{}", width, height, channels),
                    pixel_format: "mono16".into(),
                },
                ComponentInfo {
                    id: 1,
                    name: "pan_sensor".into(),
                    kind: ComponentKind::SecondaryImageSensor,
                    sensor_info: format!("{}x{}", width, height),
                    pixel_format: "mono8".into(),
                },
            ],
            mode: MockMode::Instant,
            faults: FaultPlan::healthy(),
            timing_config: TimingConfig::camera(),
            initial_temperature: 25.0,
            product_name: "Mock HSI Camera".into(),
            serial_number: None,
            seed: None,
        }
    }

    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn faults(mut self, plan: FaultPlan) -> Self {
        self.faults = plan;
        self
    }

    pub fn timing_config(mut self, config: TimingConfig) -> Self {
        self.timing_config = config;
        self
    }

    pub fn wavelengths(mut self, wavelengths_nm: Vec<f64>) -> Self {
        self.wavelengths_nm = wavelengths_nm;
        self
    }

    /// Keep only the primary image sensor.
    pub fn single_component(mut self) -> Self {
        self.components.truncate(1);
        self
    }

    pub fn initial_temperature(mut self, temp: f64) -> Self {
        self.initial_temperature = temp;
        self
    }

    pub fn serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> MockCamera {
        MockCamera::from_builder(self)
    }
}

// =============================================================================
// MockCamera
// =============================================================================

#[derive(Debug, Clone)]
struct SensorState {
    gains: Vec<f64>,
    factors: Vec<f64>,
}

/// Simulated camera.
///
/// Supports:
/// - Per-component link control (`set_component_online`)
/// - A hardware gate that holds every call in flight (`pause` / `resume`)
/// - Fault injection through [`FaultPlan`]
/// - Instant, realistic and noisy timing modes
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockCamera::new(16, 8, 10);
/// let cube = camera.expose(&request).await?;
/// ```
pub struct MockCamera {
    width: u32,
    height: u32,
    wavelengths_nm: Vec<f64>,
    components: Vec<ComponentInfo>,
    online: RwLock<Vec<bool>>,
    gate: watch::Sender<bool>,
    sensor: Mutex<SensorState>,
    applied: Mutex<Vec<Setting>>,
    exposures: AtomicU64,
    temperatures: RwLock<Vec<f64>>,
    mode: MockMode,
    faults: FaultPlan,
    timing: TimingConfig,
    rng: MockRng,
    product_name: String,
    serial_number: Option<String>,
}

impl MockCamera {
    /// Instant-mode camera with the given cube geometry.
    pub fn new(width: u32, height: u32, channels: usize) -> Self {
        MockCameraBuilder::new(width, height, channels).build()
    }

    pub fn builder(width: u32, height: u32, channels: usize) -> MockCameraBuilder {
        MockCameraBuilder::new(width, height, channels)
    }

    fn from_builder(b: MockCameraBuilder) -> Self {
        let n = b.components.len();
        let (gate, _) = watch::channel(true);
        Self {
            width: b.width,
            height: b.height,
            wavelengths_nm: b.wavelengths_nm,
            online: RwLock::new(vec![true; n]),
            gate,
            sensor: Mutex::new(SensorState {
                gains: vec![1.0; n],
                factors: vec![1.0; n],
            }),
            applied: Mutex::new(Vec::new()),
            exposures: AtomicU64::new(0),
            temperatures: RwLock::new(vec![b.initial_temperature; n]),
            mode: b.mode,
            faults: b.faults,
            timing: b.timing_config,
            rng: MockRng::new(b.seed),
            product_name: b.product_name,
            serial_number: b.serial_number,
            components: b.components,
        }
    }

    // -------------------------------------------------------------------------
    // Test controls
    // -------------------------------------------------------------------------

    pub fn set_component_online(&self, component: usize, online: bool) {
        if let Some(slot) = self.online.write().get_mut(component) {
            *slot = online;
            info!(component, online, "Mock component link changed");
        }
    }

    /// Bring every component up or down.
    pub fn set_online(&self, online: bool) {
        self.online.write().iter_mut().for_each(|o| *o = online);
        info!(online, "Mock camera link changed");
    }

    /// Hold every subsequent device call in flight until [`Self::resume`].
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    pub fn set_temperature(&self, component: usize, celsius: f64) {
        if let Some(t) = self.temperatures.write().get_mut(component) {
            *t = celsius;
        }
    }

    /// Every setting the device acknowledged, in order.
    pub fn applied_settings(&self) -> Vec<Setting> {
        self.applied.lock().clone()
    }

    pub fn exposure_count(&self) -> u64 {
        self.exposures.load(Ordering::Acquire)
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths_nm
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn pass_gate(&self) {
        let mut rx = self.gate.subscribe();
        // The sender lives in `self`, so this only ends when the gate opens.
        let _ = rx.wait_for(|open| *open).await;
    }

    fn require_online(&self, component: usize) -> Result<(), HardwareError> {
        let up = self.online.read().get(component).copied().unwrap_or(false);
        if up {
            Ok(())
        } else {
            Err(HardwareError::new(
                self.component_name(component),
                HardwareErrorKind::Communication,
                "component offline",
            ))
        }
    }

    fn component_name(&self, component: usize) -> String {
        self.components
            .get(component)
            .map_or_else(|| format!("component{}", component), |c| c.name.clone())
    }

    fn validate(&self, setting: &Setting) -> Result<usize, HardwareError> {
        let reject = |msg: String| {
            Err(HardwareError::new(
                self.component_name(0),
                HardwareErrorKind::Rejected,
                msg,
            ))
        };
        match setting {
            Setting::IntegrationTime(ms) if !(*ms > 0.0) => {
                reject(format!("integration time {} ms out of range", ms))
            }
            Setting::Fps(fps) if !(*fps > 0.0) => reject(format!("fps {} out of range", fps)),
            Setting::Average(0) => reject("average must be at least 1".into()),
            Setting::Gain { component, .. } | Setting::IntegrationTimeFactor { component, .. }
                if *component >= self.components.len() =>
            {
                reject(format!("no component {}", component))
            }
            Setting::Gain { component, .. } | Setting::IntegrationTimeFactor { component, .. } => {
                Ok(*component)
            }
            _ => Ok(0),
        }
    }
}

impl std::fmt::Debug for MockCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCamera")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.wavelengths_nm.len())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CameraDevice for MockCamera {
    fn product_name(&self) -> &str {
        &self.product_name
    }

    fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    fn components(&self) -> Vec<ComponentInfo> {
        self.components.clone()
    }

    async fn poll_link(&self) -> Vec<bool> {
        if self.mode.is_timed() {
            tokio::time::sleep(self.timing.communication()).await;
        }
        self.online.read().clone()
    }

    async fn apply(&self, setting: &Setting) -> Result<(), HardwareError> {
        self.pass_gate().await;
        let component = self.validate(setting)?;
        self.require_online(component)?;
        self.faults
            .check(&self.component_name(component), CameraOp::Apply)?;
        if self.mode.is_timed() {
            tokio::time::sleep(self.timing.communication() + self.timing.settle()).await;
        }

        {
            let mut sensor = self.sensor.lock();
            match setting {
                Setting::Gain { component, value } => sensor.gains[*component] = *value,
                Setting::IntegrationTimeFactor { component, factor } => {
                    sensor.factors[*component] = *factor
                }
                _ => {}
            }
        }
        debug!(?setting, "Mock camera applied setting");
        self.applied.lock().push(setting.clone());
        Ok(())
    }

    async fn expose(&self, request: &ExposureRequest) -> Result<ImageBuffer, HardwareError> {
        self.pass_gate().await;
        self.require_online(0)?;
        self.faults
            .check(&self.component_name(0), CameraOp::Expose)?;

        let frame_num = self.exposures.fetch_add(1, Ordering::AcqRel);
        if self.mode.is_timed() {
            let exposure = std::time::Duration::from_secs_f64(
                request.integration_time_ms.max(0.0) / 1000.0,
            );
            tokio::time::sleep(exposure + self.timing.readout()).await;
        }

        let (gain, factor) = {
            let sensor = self.sensor.lock();
            (sensor.gains[0], sensor.factors[0])
        };
        // Preview halves the spatial resolution.
        let (w, h) = if request.preview {
            ((self.width / 2).max(1), (self.height / 2).max(1))
        } else {
            (self.width, self.height)
        };
        let mut data = spectral_scene(
            w,
            h,
            &self.wavelengths_nm,
            frame_num,
            request.integration_time_ms * factor,
            gain,
            self.mode.is_timed(),
        );
        if self.mode.is_noisy() {
            for v in &mut data {
                *v = (*v + self.rng.noise(5.0)).max(0.0);
            }
        }
        if request.averages > 1 {
            // Averaging leaves the expected value unchanged.
            debug!(averages = request.averages, "Averaged exposure");
        }

        ImageBuffer::new(w, h, self.wavelengths_nm.clone(), data).map_err(|e| {
            HardwareError::new(self.component_name(0), HardwareErrorKind::Fault, e.to_string())
        })
    }

    fn temperature(&self, component: usize) -> Option<f64> {
        let t = self.temperatures.read().get(component).copied()?;
        if self.mode.is_noisy() {
            Some(t + f64::from(self.rng.noise(0.2)))
        } else {
            Some(t)
        }
    }
}
