//! Capability sets.
//!
//! What a calibration (and the camera behind it) supports is an explicit,
//! exhaustively enumerated set, queried by membership.

use crate::frame::ProcessingMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Everything a camera/calibration pair may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    AcquisitionCapture,
    AcquisitionTimelapse,
    AcquisitionContinuous,
    AcquisitionSnapshot,
    AcquisitionSetIntegrationTime,
    AcquisitionSetGain,
    AcquisitionAveraging,
    AcquisitionAutoExposure,
    ProcessingSensorRaw,
    ProcessingCubeRaw,
    ProcessingCubeReflectance,
    ProcessingCubeDarkSubtract,
    ProcessingCubeFlatfielding,
    ProcessingCubeSpectralRadiance,
    ProcessingPreview,
    ProcessingSetWhite,
    ProcessingSetDark,
    ProcessingSetSpectralRadianceCalibration,
    ProcessingSetDistanceCalibration,
    ProcessingSetDistanceValue,
    ProcessingUseDarkSpectralRadianceCalibration,
    ProcessingUseWhiteSpectralRadianceCalibration,
    ProcessingRequireWhiteDarkReflectance,
}

impl ProcessingMode {
    /// Capability a calibration must carry to run this mode.
    #[must_use]
    pub fn required_capability(self) -> Capability {
        match self {
            ProcessingMode::Preview => Capability::ProcessingPreview,
            ProcessingMode::Raw => Capability::ProcessingCubeRaw,
            ProcessingMode::DarkSubtract => Capability::ProcessingCubeDarkSubtract,
            ProcessingMode::Reflectance => Capability::ProcessingCubeReflectance,
            ProcessingMode::SpectralRadiance => Capability::ProcessingCubeSpectralRadiance,
        }
    }
}

/// Set of supported capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capability the pipeline knows about.
    #[must_use]
    pub fn full() -> Self {
        use Capability::*;
        [
            AcquisitionCapture,
            AcquisitionTimelapse,
            AcquisitionContinuous,
            AcquisitionSnapshot,
            AcquisitionSetIntegrationTime,
            AcquisitionSetGain,
            AcquisitionAveraging,
            AcquisitionAutoExposure,
            ProcessingSensorRaw,
            ProcessingCubeRaw,
            ProcessingCubeReflectance,
            ProcessingCubeDarkSubtract,
            ProcessingCubeFlatfielding,
            ProcessingCubeSpectralRadiance,
            ProcessingPreview,
            ProcessingSetWhite,
            ProcessingSetDark,
            ProcessingSetSpectralRadianceCalibration,
            ProcessingSetDistanceCalibration,
            ProcessingSetDistanceValue,
            ProcessingUseDarkSpectralRadianceCalibration,
            ProcessingUseWhiteSpectralRadianceCalibration,
        ]
        .into_iter()
        .collect()
    }

    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn remove(&mut self, capability: Capability) -> bool {
        self.0.remove(&capability)
    }

    #[must_use]
    pub fn without(mut self, capability: Capability) -> Self {
        self.0.remove(&capability);
        self
    }

    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
