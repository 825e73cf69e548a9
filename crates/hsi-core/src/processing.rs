//! Processing pipeline.
//!
//! A [`ProcessingPipeline`] binds one calibration context and holds the
//! mutable processing state around it: the requested [`ProcessingArgs`], the
//! attached reference frames and a working distance. `apply` turns a raw
//! frame into a processed cube in place.
//!
//! The numeric transform itself sits behind [`CubeKernel`]; the pipeline
//! owns reference management and capability gating. [`LinearKernel`] is the
//! default kernel.

use crate::calibration::Calibration;
use crate::capability::{Capability, CapabilitySet};
use crate::error::{HsiError, HsiResult};
use crate::frame::{Frame, ImageBuffer, ProcessingMode, QualityFlag, CUBE_BUFFER};
use crate::session::SessionFile;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info};

/// Sensor saturation level for over-illumination checks.
pub const SATURATION_LEVEL: f32 = 65_535.0;

/// Integration times closer than this are considered equal.
const INTEGRATION_TOLERANCE_MS: f64 = 1e-6;

/// Flags this pipeline derives; recomputed on every `apply`.
const DERIVED_FLAGS: [QualityFlag; 5] = [
    QualityFlag::PoorReference,
    QualityFlag::OverIlluminated,
    QualityFlag::DarkIntegrationTime,
    QualityFlag::WhiteIntegrationTime,
    QualityFlag::WhiteDarkIntegrationTime,
];

/// Named calibration reference slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReferenceKind {
    Dark,
    White,
    WhiteDark,
    SpectralRadiance,
    Distance,
}

impl ReferenceKind {
    fn setter_capability(self) -> Capability {
        match self {
            ReferenceKind::Dark => Capability::ProcessingSetDark,
            ReferenceKind::White | ReferenceKind::WhiteDark => Capability::ProcessingSetWhite,
            ReferenceKind::SpectralRadiance => Capability::ProcessingSetSpectralRadianceCalibration,
            ReferenceKind::Distance => Capability::ProcessingSetDistanceCalibration,
        }
    }
}

/// Requested processing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessingArgs {
    pub mode: ProcessingMode,
    /// Process frames captured under a different calibration id.
    pub allow_recalib: bool,
}

impl ProcessingArgs {
    #[must_use]
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            mode,
            allow_recalib: false,
        }
    }
}

/// What a pipeline is constructed from.
#[derive(Debug, Clone)]
pub enum ProcessingSource {
    /// A calibration bundle.
    Calibration(Arc<dyn Calibration>),
    /// A recorded session; binds the calibration stored with it and adopts
    /// its reference frames.
    Session(Arc<dyn SessionFile>),
    /// An existing frame; binds the calibration the frame was captured under.
    Frame(Frame),
}

/// Calibration context recovered from a frame alone.
#[derive(Debug)]
struct EmbeddedCalibration {
    id: String,
    capabilities: CapabilitySet,
}

impl EmbeddedCalibration {
    fn from_frame(frame: &Frame) -> Self {
        // Without factory radiometry only reference-based modes are possible.
        let capabilities = CapabilitySet::full()
            .without(Capability::ProcessingCubeSpectralRadiance)
            .without(Capability::ProcessingSetSpectralRadianceCalibration);
        Self {
            id: frame
                .calibration_id
                .clone()
                .unwrap_or_else(|| format!("embedded:{}", frame.name)),
            capabilities,
        }
    }
}

impl Calibration for EmbeddedCalibration {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }
}

// =============================================================================
// Kernel
// =============================================================================

/// Inputs a kernel sees besides the raw buffer.
#[derive(Debug, Clone, Copy)]
pub struct KernelInputs<'a> {
    pub dark: Option<&'a ImageBuffer>,
    pub white: Option<&'a ImageBuffer>,
    pub white_dark: Option<&'a ImageBuffer>,
    pub radiance: Option<&'a ImageBuffer>,
    pub radiance_gain: Option<f32>,
    /// Multiplicative distance correction, 1.0 when no distance is set.
    pub distance_factor: f64,
}

/// Numeric transform from raw sensor data to a processed cube.
///
/// Must be deterministic: identical inputs give identical output.
pub trait CubeKernel: Send + Sync + Debug {
    fn transform(
        &self,
        mode: ProcessingMode,
        raw: &ImageBuffer,
        inputs: &KernelInputs<'_>,
    ) -> HsiResult<ImageBuffer>;
}

/// Per-sample linear corrections.
///
/// * `Raw`, `Preview`: copy of the raw data
/// * `DarkSubtract`: `raw - dark`
/// * `Reflectance`: `(raw - dark) / (white - white_dark)`, with the dark
///   reference standing in for a missing white-dark
/// * `SpectralRadiance`: `(raw - dark) * gain`, gain per sample from the
///   radiance reference or the calibration's factory gain
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearKernel;

fn sub(a: &ImageBuffer, b: Option<&ImageBuffer>) -> Vec<f32> {
    match b {
        Some(b) => a.data.iter().zip(&b.data).map(|(x, y)| x - y).collect(),
        None => a.data.clone(),
    }
}

impl CubeKernel for LinearKernel {
    fn transform(
        &self,
        mode: ProcessingMode,
        raw: &ImageBuffer,
        inputs: &KernelInputs<'_>,
    ) -> HsiResult<ImageBuffer> {
        let data = match mode {
            ProcessingMode::Raw | ProcessingMode::Preview => raw.data.clone(),
            ProcessingMode::DarkSubtract => sub(raw, inputs.dark),
            ProcessingMode::Reflectance => {
                let signal = sub(raw, inputs.dark);
                let white = inputs.white.ok_or_else(|| {
                    HsiError::Processing("reflectance requires a white reference".into())
                })?;
                let baseline = inputs.white_dark.or(inputs.dark);
                let span = sub(white, baseline);
                let factor = inputs.distance_factor as f32;
                signal
                    .iter()
                    .zip(&span)
                    .map(|(s, w)| if *w > 0.0 { s / w * factor } else { 0.0 })
                    .collect()
            }
            ProcessingMode::SpectralRadiance => {
                let signal = sub(raw, inputs.dark);
                match (inputs.radiance, inputs.radiance_gain) {
                    (Some(gain), _) => signal.iter().zip(&gain.data).map(|(s, g)| s * g).collect(),
                    (None, Some(gain)) => signal.iter().map(|s| s * gain).collect(),
                    (None, None) => {
                        return Err(HsiError::Processing(
                            "spectral radiance requires a radiance gain".into(),
                        ))
                    }
                }
            }
        };
        ImageBuffer::new(raw.width, raw.height, raw.wavelengths_nm.clone(), data)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Default)]
struct PipelineState {
    args: ProcessingArgs,
    references: BTreeMap<ReferenceKind, Frame>,
    distance_mm: Option<f64>,
    /// Distance the correction is relative to, fixed by `calc_distance`.
    baseline_mm: Option<f64>,
}

/// Stateful raw-to-cube transform bound to one calibration.
#[derive(Debug)]
pub struct ProcessingPipeline {
    calibration: Arc<dyn Calibration>,
    kernel: Arc<dyn CubeKernel>,
    state: RwLock<PipelineState>,
}

impl ProcessingPipeline {
    /// Build a pipeline from its calibration source.
    pub fn new(source: ProcessingSource) -> HsiResult<Self> {
        let mut state = PipelineState::default();
        let calibration: Arc<dyn Calibration> = match source {
            ProcessingSource::Calibration(calibration) => calibration,
            ProcessingSource::Session(session) => {
                let calibration = session.calibration().ok_or_else(|| {
                    HsiError::Configuration(format!(
                        "session '{}' was saved without a calibration",
                        session.name()
                    ))
                })?;
                state.references = session_references(session.as_ref())?;
                calibration
            }
            ProcessingSource::Frame(frame) => Arc::new(EmbeddedCalibration::from_frame(&frame)),
        };
        info!(
            calibration = calibration.id(),
            references = state.references.len(),
            "Processing pipeline created"
        );
        Ok(Self {
            calibration,
            kernel: Arc::new(LinearKernel),
            state: RwLock::new(state),
        })
    }

    /// Replace the numeric kernel.
    #[must_use]
    pub fn with_kernel(mut self, kernel: Arc<dyn CubeKernel>) -> Self {
        self.kernel = kernel;
        self
    }

    #[must_use]
    pub fn calibration_id(&self) -> &str {
        self.calibration.id()
    }

    #[must_use]
    pub fn calibration(&self) -> &Arc<dyn Calibration> {
        &self.calibration
    }

    // -------------------------------------------------------------------------
    // Arguments
    // -------------------------------------------------------------------------

    pub fn set_processing_args(&self, args: ProcessingArgs) {
        self.state.write().args = args;
    }

    #[must_use]
    pub fn processing_args(&self) -> ProcessingArgs {
        self.state.read().args
    }

    pub fn set_processing_mode(&self, mode: ProcessingMode) {
        self.state.write().args.mode = mode;
    }

    #[must_use]
    pub fn processing_mode(&self) -> ProcessingMode {
        self.state.read().args.mode
    }

    pub fn set_recalibration(&self, allow: bool) {
        self.state.write().args.allow_recalib = allow;
    }

    #[must_use]
    pub fn recalibration(&self) -> bool {
        self.state.read().args.allow_recalib
    }

    // -------------------------------------------------------------------------
    // References
    // -------------------------------------------------------------------------

    /// Attach `frame` as the `kind` reference, replacing any previous one.
    pub fn set_reference(&self, frame: Frame, kind: ReferenceKind) -> HsiResult<()> {
        let needed = kind.setter_capability();
        if !self.calibration.capabilities().contains(needed) {
            return Err(HsiError::Configuration(format!(
                "calibration '{}' does not accept {:?} references",
                self.calibration.id(),
                kind
            )));
        }
        if frame.raw().is_none() {
            return Err(HsiError::Configuration(format!(
                "{:?} reference '{}' has no raw buffer",
                kind, frame.name
            )));
        }
        debug!(?kind, reference = %frame.name, "Reference attached");
        self.state.write().references.insert(kind, frame);
        Ok(())
    }

    /// Detach the `kind` reference. Returns whether one was attached.
    pub fn clear_reference(&self, kind: ReferenceKind) -> bool {
        self.state.write().references.remove(&kind).is_some()
    }

    #[must_use]
    pub fn reference(&self, kind: ReferenceKind) -> Option<Frame> {
        self.state.read().references.get(&kind).cloned()
    }

    #[must_use]
    pub fn has_reference(&self, kind: ReferenceKind) -> bool {
        self.state.read().references.contains_key(&kind)
    }

    /// Set the working distance used by subsequent `apply` calls.
    ///
    /// Reflectance is scaled by `(distance / baseline)²`. The baseline is the
    /// distance recorded on the attached Distance reference, or the
    /// calibration's own reference distance when none is attached. The
    /// baseline is read here, so call again after swapping that reference.
    pub fn calc_distance(&self, distance_mm: f64) -> HsiResult<()> {
        if !self
            .calibration
            .capabilities()
            .contains(Capability::ProcessingSetDistanceValue)
        {
            return Err(HsiError::Configuration(format!(
                "calibration '{}' does not support distance correction",
                self.calibration.id()
            )));
        }
        if !distance_mm.is_finite() || distance_mm <= 0.0 {
            return Err(HsiError::Configuration(format!(
                "distance must be positive, got {distance_mm} mm"
            )));
        }
        let mut state = self.state.write();
        let baseline_mm = match state.references.get(&ReferenceKind::Distance) {
            Some(reference) => match reference.distance_mm {
                Some(d) if d.is_finite() && d > 0.0 => d,
                _ => {
                    return Err(HsiError::Configuration(format!(
                        "distance reference '{}' has no recorded distance",
                        reference.name
                    )))
                }
            },
            None => self.calibration.reference_distance_mm(),
        };
        debug!(distance_mm, baseline_mm, "Working distance set");
        state.distance_mm = Some(distance_mm);
        state.baseline_mm = Some(baseline_mm);
        Ok(())
    }

    #[must_use]
    pub fn distance(&self) -> Option<f64> {
        self.state.read().distance_mm
    }

    // -------------------------------------------------------------------------
    // Capability gating
    // -------------------------------------------------------------------------

    /// Whether `args` can be satisfied for `frame` with the current state.
    #[must_use]
    pub fn is_capable(&self, frame: &Frame, args: &ProcessingArgs) -> bool {
        let state = self.state.read();
        self.check(frame, args, &state).is_ok()
    }

    fn check(&self, frame: &Frame, args: &ProcessingArgs, state: &PipelineState) -> Result<(), String> {
        let raw = frame
            .raw()
            .ok_or_else(|| format!("frame '{}' carries no raw buffer", frame.name))?;

        let caps = self.calibration.capabilities();
        let needed = args.mode.required_capability();
        if !caps.contains(needed) {
            return Err(format!(
                "calibration '{}' lacks {:?}",
                self.calibration.id(),
                needed
            ));
        }

        if let Some(id) = &frame.calibration_id {
            if id != self.calibration.id() && !args.allow_recalib {
                return Err(format!(
                    "frame was captured under calibration '{}', pipeline is bound to '{}'",
                    id,
                    self.calibration.id()
                ));
            }
        }

        let mut required: Vec<ReferenceKind> = Vec::new();
        match args.mode {
            ProcessingMode::Raw | ProcessingMode::Preview => {}
            ProcessingMode::DarkSubtract => required.push(ReferenceKind::Dark),
            ProcessingMode::Reflectance => {
                required.extend([ReferenceKind::Dark, ReferenceKind::White]);
                if caps.contains(Capability::ProcessingRequireWhiteDarkReflectance) {
                    required.push(ReferenceKind::WhiteDark);
                }
            }
            ProcessingMode::SpectralRadiance => {
                required.push(ReferenceKind::Dark);
                if !state.references.contains_key(&ReferenceKind::SpectralRadiance)
                    && self.calibration.radiance_gain().is_none()
                {
                    return Err("no spectral radiance reference and no factory gain".into());
                }
            }
        }

        for kind in required {
            let reference = state
                .references
                .get(&kind)
                .ok_or_else(|| format!("{kind:?} reference missing"))?;
            check_geometry(kind, reference, raw)?;
        }
        // Optional references still have to line up if they will be used.
        for kind in [ReferenceKind::WhiteDark, ReferenceKind::SpectralRadiance] {
            if let Some(reference) = state.references.get(&kind) {
                check_geometry(kind, reference, raw)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Apply
    // -------------------------------------------------------------------------

    /// Process `frame` in place with the current arguments.
    ///
    /// Fails with `Capability` when [`Self::is_capable`] would be false; the
    /// mode is never silently downgraded.
    pub fn apply(&self, frame: &mut Frame) -> HsiResult<()> {
        let state = self.state.read();
        let args = state.args;
        self.check(frame, &args, &state)
            .map_err(|reason| HsiError::Capability {
                mode: args.mode,
                reason,
            })?;

        let buffer = |kind: ReferenceKind| state.references.get(&kind).and_then(Frame::raw);
        let distance_factor = match (state.distance_mm, state.baseline_mm) {
            (Some(d), Some(baseline)) if args.mode == ProcessingMode::Reflectance => {
                (d / baseline).powi(2)
            }
            _ => 1.0,
        };
        let inputs = KernelInputs {
            dark: buffer(ReferenceKind::Dark).filter(|_| args.mode != ProcessingMode::Raw),
            white: buffer(ReferenceKind::White),
            white_dark: buffer(ReferenceKind::WhiteDark),
            radiance: buffer(ReferenceKind::SpectralRadiance),
            radiance_gain: self.calibration.radiance_gain(),
            distance_factor,
        };

        let raw = frame
            .raw()
            .ok_or_else(|| HsiError::Processing("raw buffer vanished".into()))?;
        let cube = self.kernel.transform(args.mode, raw, &inputs)?;
        let over_illuminated = raw.max() >= SATURATION_LEVEL;

        for flag in DERIVED_FLAGS {
            frame.flags.remove(&flag);
        }
        if over_illuminated {
            frame.flags.insert(QualityFlag::OverIlluminated);
        }
        for (kind, flag) in [
            (ReferenceKind::Dark, QualityFlag::DarkIntegrationTime),
            (ReferenceKind::White, QualityFlag::WhiteIntegrationTime),
            (ReferenceKind::WhiteDark, QualityFlag::WhiteDarkIntegrationTime),
        ] {
            if let Some(reference) = state.references.get(&kind) {
                if (reference.integration_time_ms - frame.integration_time_ms).abs()
                    > INTEGRATION_TOLERANCE_MS
                {
                    frame.flags.insert(flag);
                }
            }
        }
        if args.mode == ProcessingMode::Reflectance {
            if let (Some(white), Some(dark)) = (inputs.white, inputs.dark) {
                if white.mean() <= dark.mean() {
                    frame.flags.insert(QualityFlag::PoorReference);
                }
            }
        }

        frame.insert_buffer(CUBE_BUFFER, cube);
        frame.processing_mode = args.mode;
        frame.distance_mm = state.distance_mm;
        if frame.calibration_id.is_none() || args.allow_recalib {
            frame.calibration_id = Some(self.calibration.id().to_string());
        }
        debug!(frame = %frame.name, mode = %args.mode, "Frame processed");
        Ok(())
    }

    /// Owned-value form of [`Self::apply`].
    pub fn process(&self, mut frame: Frame) -> HsiResult<Frame> {
        self.apply(&mut frame)?;
        Ok(frame)
    }
}

fn check_geometry(kind: ReferenceKind, reference: &Frame, raw: &ImageBuffer) -> Result<(), String> {
    match reference.raw() {
        Some(buf) if buf.same_geometry(raw) => Ok(()),
        Some(buf) => Err(format!(
            "{:?} reference is {}x{}x{}, frame is {}x{}x{}",
            kind, buf.width, buf.height, buf.channels, raw.width, raw.height, raw.channels
        )),
        None => Err(format!("{kind:?} reference has no raw buffer")),
    }
}

/// Map a session's stored references onto reference slots by name.
fn session_references(session: &dyn SessionFile) -> HsiResult<BTreeMap<ReferenceKind, Frame>> {
    use crate::session::SessionItemType;

    let mut references = BTreeMap::new();
    for idx in 0..session.size(SessionItemType::References) {
        let frame = session.measurement(idx, SessionItemType::References)?;
        let kind = match frame.name.to_ascii_lowercase().as_str() {
            "dark" => ReferenceKind::Dark,
            "white" => ReferenceKind::White,
            "whitedark" | "white_dark" => ReferenceKind::WhiteDark,
            "sprad" | "spectral_radiance" => ReferenceKind::SpectralRadiance,
            "distance" => ReferenceKind::Distance,
            _ => continue,
        };
        references.insert(kind, frame);
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationBundle;
    use crate::frame::SessionInfo;
    use crate::session::RecordedSession;

    const WL: [f64; 2] = [500.0, 600.0];

    fn frame(name: &str, value: f32, integration: f64) -> Frame {
        let raw = ImageBuffer::filled(3, 2, WL.to_vec(), value).unwrap();
        Frame::new(name, SessionInfo::default(), raw)
            .with_integration_time(integration)
            .with_calibration("cal")
    }

    fn pipeline() -> ProcessingPipeline {
        let calibration = Arc::new(CalibrationBundle::new("cal"));
        ProcessingPipeline::new(ProcessingSource::Calibration(calibration)).unwrap()
    }

    #[test]
    fn test_raw_needs_no_references() {
        let p = pipeline();
        let f = frame("m", 100.0, 10.0);
        assert!(p.is_capable(&f, &ProcessingArgs::new(ProcessingMode::Raw)));
        assert!(!p.is_capable(&f, &ProcessingArgs::new(ProcessingMode::DarkSubtract)));
        assert!(!p.is_capable(&f, &ProcessingArgs::new(ProcessingMode::Reflectance)));
    }

    #[test]
    fn test_apply_refuses_instead_of_downgrading() {
        let p = pipeline();
        p.set_processing_mode(ProcessingMode::Reflectance);
        let mut f = frame("m", 100.0, 10.0);
        let err = p.apply(&mut f).unwrap_err();
        assert!(matches!(
            err,
            HsiError::Capability {
                mode: ProcessingMode::Reflectance,
                ..
            }
        ));
        assert_eq!(f.processing_mode, ProcessingMode::Raw);
        assert!(f.cube().is_none());
    }

    #[test]
    fn test_reflectance_with_references() {
        let p = pipeline();
        p.set_reference(frame("dark", 10.0, 10.0), ReferenceKind::Dark).unwrap();
        p.set_reference(frame("white", 210.0, 10.0), ReferenceKind::White).unwrap();
        p.set_processing_mode(ProcessingMode::Reflectance);

        let processed = p.process(frame("m", 110.0, 10.0)).unwrap();
        assert_eq!(processed.processing_mode, ProcessingMode::Reflectance);
        let cube = processed.cube().unwrap();
        assert!((cube.data[0] - 0.5).abs() < 1e-6);
        assert!(processed.flags.is_empty());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let p = pipeline();
        p.set_reference(frame("dark", 10.0, 5.0), ReferenceKind::Dark).unwrap();
        p.set_processing_mode(ProcessingMode::DarkSubtract);

        let mut once = frame("m", 50.0, 10.0);
        p.apply(&mut once).unwrap();
        let mut twice = once.clone();
        p.apply(&mut twice).unwrap();
        assert_eq!(once, twice);
        assert!(once.has_flag(QualityFlag::DarkIntegrationTime));
        assert_eq!(once.cube().unwrap().data[0], 40.0);
    }

    #[test]
    fn test_reference_set_clear_query() {
        let p = pipeline();
        assert!(!p.has_reference(ReferenceKind::White));
        p.set_reference(frame("white", 1.0, 1.0), ReferenceKind::White).unwrap();
        assert!(p.has_reference(ReferenceKind::White));
        assert_eq!(p.reference(ReferenceKind::White).unwrap().name, "white");
        assert!(p.clear_reference(ReferenceKind::White));
        assert!(!p.clear_reference(ReferenceKind::White));
    }

    #[test]
    fn test_geometry_mismatch_blocks_mode() {
        let p = pipeline();
        let small = Frame::new(
            "dark",
            SessionInfo::default(),
            ImageBuffer::filled(1, 1, WL.to_vec(), 0.0).unwrap(),
        );
        p.set_reference(small, ReferenceKind::Dark).unwrap();
        let f = frame("m", 1.0, 1.0);
        assert!(!p.is_capable(&f, &ProcessingArgs::new(ProcessingMode::DarkSubtract)));
    }

    #[test]
    fn test_foreign_calibration_needs_recalib() {
        let p = pipeline();
        let mut f = frame("m", 1.0, 1.0);
        f.calibration_id = Some("other".into());
        let raw = ProcessingArgs::new(ProcessingMode::Raw);
        assert!(!p.is_capable(&f, &raw));
        let recalib = ProcessingArgs {
            allow_recalib: true,
            ..raw
        };
        assert!(p.is_capable(&f, &recalib));

        p.set_recalibration(true);
        p.apply(&mut f).unwrap();
        assert_eq!(f.calibration_id.as_deref(), Some("cal"));
    }

    #[test]
    fn test_spectral_radiance_uses_factory_gain() {
        let calibration = Arc::new(CalibrationBundle::new("cal").with_radiance_gain(2.0));
        let p = ProcessingPipeline::new(ProcessingSource::Calibration(calibration)).unwrap();
        p.set_reference(frame("dark", 1.0, 1.0), ReferenceKind::Dark).unwrap();
        p.set_processing_mode(ProcessingMode::SpectralRadiance);
        let out = p.process(frame("m", 4.0, 1.0)).unwrap();
        assert_eq!(out.cube().unwrap().data[0], 6.0);

        // Without a gain the mode is not available.
        assert!(!pipeline().is_capable(&out, &ProcessingArgs::new(ProcessingMode::SpectralRadiance)));
    }

    #[test]
    fn test_missing_capability() {
        let caps = CapabilitySet::full().without(Capability::ProcessingCubeReflectance);
        let calibration = Arc::new(CalibrationBundle::new("cal").with_capabilities(caps));
        let p = ProcessingPipeline::new(ProcessingSource::Calibration(calibration)).unwrap();
        p.set_reference(frame("dark", 0.0, 1.0), ReferenceKind::Dark).unwrap();
        p.set_reference(frame("white", 9.0, 1.0), ReferenceKind::White).unwrap();
        assert!(!p.is_capable(&frame("m", 1.0, 1.0), &ProcessingArgs::new(ProcessingMode::Reflectance)));
    }

    #[test]
    fn test_white_dark_requirement() {
        let caps = CapabilitySet::full().with(Capability::ProcessingRequireWhiteDarkReflectance);
        let calibration = Arc::new(CalibrationBundle::new("cal").with_capabilities(caps));
        let p = ProcessingPipeline::new(ProcessingSource::Calibration(calibration)).unwrap();
        p.set_reference(frame("dark", 0.0, 1.0), ReferenceKind::Dark).unwrap();
        p.set_reference(frame("white", 9.0, 1.0), ReferenceKind::White).unwrap();
        let args = ProcessingArgs::new(ProcessingMode::Reflectance);
        let f = frame("m", 1.0, 1.0);
        assert!(!p.is_capable(&f, &args));
        p.set_reference(frame("whitedark", 1.0, 1.0), ReferenceKind::WhiteDark).unwrap();
        assert!(p.is_capable(&f, &args));
    }

    #[test]
    fn test_distance_scales_reflectance() {
        let p = pipeline();
        p.set_reference(frame("dark", 0.0, 1.0), ReferenceKind::Dark).unwrap();
        p.set_reference(frame("white", 100.0, 1.0), ReferenceKind::White).unwrap();
        p.set_processing_mode(ProcessingMode::Reflectance);
        assert!(p.calc_distance(-3.0).is_err());
        p.calc_distance(2000.0).unwrap();

        let out = p.process(frame("m", 50.0, 1.0)).unwrap();
        assert!((out.cube().unwrap().data[0] - 2.0).abs() < 1e-6);
        assert_eq!(out.distance_mm, Some(2000.0));
    }

    #[test]
    fn test_distance_reference_sets_baseline() {
        let p = pipeline();
        p.set_reference(frame("dark", 0.0, 1.0), ReferenceKind::Dark).unwrap();
        p.set_reference(frame("white", 100.0, 1.0), ReferenceKind::White).unwrap();
        p.set_processing_mode(ProcessingMode::Reflectance);

        let mut unmeasured = frame("distance", 50.0, 1.0);
        p.set_reference(unmeasured.clone(), ReferenceKind::Distance).unwrap();
        assert!(p.calc_distance(1000.0).unwrap_err().is_configuration());
        assert_eq!(p.distance(), None);

        unmeasured.distance_mm = Some(500.0);
        p.set_reference(unmeasured, ReferenceKind::Distance).unwrap();
        p.calc_distance(1000.0).unwrap();
        let out = p.process(frame("m", 50.0, 1.0)).unwrap();
        // (1000 / 500)² over a reflectance of 0.5.
        assert!((out.cube().unwrap().data[0] - 2.0).abs() < 1e-6);

        // The baseline was taken at calc time.
        assert!(p.clear_reference(ReferenceKind::Distance));
        let out = p.process(frame("m", 50.0, 1.0)).unwrap();
        assert!((out.cube().unwrap().data[0] - 2.0).abs() < 1e-6);
        p.calc_distance(1000.0).unwrap();
        let out = p.process(frame("m", 50.0, 1.0)).unwrap();
        assert!((out.cube().unwrap().data[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_over_illumination_flag() {
        let p = pipeline();
        let out = p.process(frame("m", SATURATION_LEVEL, 1.0)).unwrap();
        assert!(out.has_flag(QualityFlag::OverIlluminated));
    }

    #[test]
    fn test_from_session_adopts_references() {
        let mut session = RecordedSession::new("s", 1.0, Default::default())
            .with_calibration(CalibrationBundle::new("cal"));
        session.push_reference(frame("dark", 1.0, 1.0));
        session.push_reference(frame("white", 5.0, 1.0));
        let p = ProcessingPipeline::new(ProcessingSource::Session(Arc::new(session))).unwrap();
        assert_eq!(p.calibration_id(), "cal");
        assert!(p.has_reference(ReferenceKind::Dark));
        assert!(p.has_reference(ReferenceKind::White));

        let bare = RecordedSession::new("bare", 1.0, Default::default());
        assert!(ProcessingPipeline::new(ProcessingSource::Session(Arc::new(bare)))
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_from_frame_binds_its_calibration() {
        let p = ProcessingPipeline::new(ProcessingSource::Frame(frame("m", 1.0, 1.0))).unwrap();
        assert_eq!(p.calibration_id(), "cal");
        assert!(!p.is_capable(
            &frame("x", 1.0, 1.0),
            &ProcessingArgs::new(ProcessingMode::SpectralRadiance)
        ));
    }
}
