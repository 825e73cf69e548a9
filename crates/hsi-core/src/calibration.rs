//! Calibration bundles.
//!
//! A calibration is an immutable, read-mostly bundle loaded once and shared
//! by reference between acquisition and processing. Parsing vendor
//! calibration files is not this crate's business; [`CalibrationBundle`] is
//! a plain JSON manifest carrying what the pipeline needs to know.

use crate::capability::CapabilitySet;
use crate::error::HsiResult;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// Read-only view of a camera calibration.
pub trait Calibration: Send + Sync + Debug {
    /// Unique identifier; frames record it so mismatches can be detected.
    fn id(&self) -> &str;

    /// What this calibration supports.
    fn capabilities(&self) -> &CapabilitySet;

    /// Factory spectral-radiance gain, if the calibration carries one.
    fn radiance_gain(&self) -> Option<f32> {
        None
    }

    /// Working distance the white reference was calibrated at.
    fn reference_distance_mm(&self) -> f64 {
        1000.0
    }
}

/// JSON-backed calibration manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBundle {
    pub id: String,
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub radiance_gain: Option<f32>,
    #[serde(default = "default_reference_distance")]
    pub reference_distance_mm: f64,
}

fn default_reference_distance() -> f64 {
    1000.0
}

impl CalibrationBundle {
    /// A bundle supporting every known capability.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: CapabilitySet::full(),
            radiance_gain: None,
            reference_distance_mm: default_reference_distance(),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_radiance_gain(mut self, gain: f32) -> Self {
        self.radiance_gain = Some(gain);
        self
    }

    /// Load a manifest from disk.
    pub fn load(path: impl AsRef<Path>) -> HsiResult<Arc<Self>> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let bundle: Self = serde_json::from_str(&text)?;
        tracing::info!(
            calibration = %bundle.id,
            capabilities = bundle.capabilities.len(),
            path = %path.as_ref().display(),
            "Loaded calibration"
        );
        Ok(Arc::new(bundle))
    }

    /// Write the manifest to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> HsiResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl Calibration for CalibrationBundle {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn radiance_gain(&self) -> Option<f32> {
        self.radiance_gain
    }

    fn reference_distance_mm(&self) -> f64 {
        self.reference_distance_mm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.json");
        CalibrationBundle::new("cal-7")
            .with_radiance_gain(0.5)
            .save(&path)
            .unwrap();

        let loaded = CalibrationBundle::load(&path).unwrap();
        assert_eq!(loaded.id(), "cal-7");
        assert_eq!(loaded.radiance_gain(), Some(0.5));
        assert!(loaded
            .capabilities()
            .contains(Capability::ProcessingCubeReflectance));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = CalibrationBundle::load("/nonexistent/calib.json").unwrap_err();
        assert!(matches!(err, crate::error::HsiError::Io(_)));
    }

    #[test]
    fn test_malformed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = CalibrationBundle::load(&path).unwrap_err();
        assert!(matches!(err, crate::error::HsiError::Serialization(_)));
    }

    #[test]
    fn test_default_distance_when_absent() {
        let bundle: CalibrationBundle =
            serde_json::from_str(r#"{"id":"c","capabilities":[]}"#).unwrap();
        assert_eq!(bundle.reference_distance_mm(), 1000.0);
        assert!(bundle.capabilities().is_empty());
    }
}
