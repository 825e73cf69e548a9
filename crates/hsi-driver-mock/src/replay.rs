//! Camera that plays back a recorded session.

use async_trait::async_trait;
use hsi_core::{
    CameraDevice, ComponentInfo, ComponentKind, ExposureRequest, HardwareError, HardwareErrorKind,
    ImageBuffer, SessionFile, SessionItemType, Setting,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Serves the data-carrying frames of a session as exposures, looping at the end.
///
/// Settings are acknowledged and recorded but do not alter the playback.
#[derive(Debug)]
pub struct ReplayCamera {
    session: Arc<dyn SessionFile>,
    cursor: AtomicUsize,
    applied: Mutex<Vec<Setting>>,
}

impl ReplayCamera {
    pub fn new(session: Arc<dyn SessionFile>) -> Self {
        Self {
            session,
            cursor: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn applied_settings(&self) -> Vec<Setting> {
        self.applied.lock().clone()
    }

    fn fault(&self, message: impl Into<String>) -> HardwareError {
        HardwareError::new(self.session.name(), HardwareErrorKind::Fault, message)
    }
}

#[async_trait]
impl CameraDevice for ReplayCamera {
    fn product_name(&self) -> &str {
        "Session Replay"
    }

    fn components(&self) -> Vec<ComponentInfo> {
        vec![ComponentInfo {
            id: 0,
            name: format!("replay:{}", self.session.name()),
            kind: ComponentKind::ImageSensor,
            sensor_info: "recorded".into(),
            pixel_format: "f32".into(),
        }]
    }

    async fn poll_link(&self) -> Vec<bool> {
        vec![true]
    }

    async fn apply(&self, setting: &Setting) -> Result<(), HardwareError> {
        self.applied.lock().push(setting.clone());
        Ok(())
    }

    async fn expose(&self, _request: &ExposureRequest) -> Result<ImageBuffer, HardwareError> {
        let total = self.session.size(SessionItemType::NoGaps);
        if total == 0 {
            return Err(self.fault("session has no recorded frames"));
        }
        let idx = self.cursor.fetch_add(1, Ordering::AcqRel) % total;
        let frame = self
            .session
            .measurement(idx, SessionItemType::NoGaps)
            .map_err(|e| self.fault(e.to_string()))?;
        debug!(idx, frame = %frame.name, "Replaying frame");
        frame
            .raw()
            .cloned()
            .ok_or_else(|| self.fault(format!("frame '{}' has no raw buffer", frame.name)))
    }

    fn temperature(&self, _component: usize) -> Option<f64> {
        None
    }
}
