//! Recorded sessions.
//!
//! A session file is an ordered, immutable sequence of frames captured
//! earlier, plus the reference frames and calibration that were active at the
//! time. It can stand in for a live camera (session replay) or seed a
//! processing pipeline. Once loaded it is shared read-only.

use crate::calibration::{Calibration, CalibrationBundle};
use crate::error::{HsiError, HsiResult};
use crate::frame::{Frame, OperationMode};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// Which view of a session to index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionItemType {
    /// Every recorded slot, including dropped-frame placeholders.
    #[default]
    AllFrames,
    /// Only frames that carry data.
    NoGaps,
    /// Reference frames (dark, white, ...) stored with the session.
    References,
}

/// Read-only access to a recorded session.
pub trait SessionFile: Send + Sync + Debug {
    /// Session name, as stamped on its frames.
    fn name(&self) -> &str;

    /// Number of items of the given type.
    fn size(&self, item: SessionItemType) -> usize;

    /// Item `index` of the given type.
    fn measurement(&self, index: usize, item: SessionItemType) -> HsiResult<Frame>;

    /// Frame rate the session was recorded at.
    fn fps(&self) -> f64;

    fn operation_mode(&self) -> OperationMode;

    /// Calibration the session was recorded under, if stored with it.
    fn calibration(&self) -> Option<Arc<dyn Calibration>>;
}

/// In-memory session, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedSession {
    pub name: String,
    pub fps: f64,
    pub operation_mode: OperationMode,
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub references: Vec<Frame>,
    #[serde(default)]
    pub calibration: Option<CalibrationBundle>,
    /// Positions of data-carrying frames, rebuilt on load.
    #[serde(skip)]
    populated: Vec<usize>,
}

impl RecordedSession {
    pub fn new(name: impl Into<String>, fps: f64, operation_mode: OperationMode) -> Self {
        Self {
            name: name.into(),
            fps,
            operation_mode,
            frames: Vec::new(),
            references: Vec::new(),
            calibration: None,
            populated: Vec::new(),
        }
    }

    /// Append a recorded frame (or a [`Frame::dropped`] placeholder).
    pub fn push(&mut self, frame: Frame) {
        if !frame.is_dropped() {
            self.populated.push(self.frames.len());
        }
        self.frames.push(frame);
    }

    pub fn push_reference(&mut self, frame: Frame) {
        self.references.push(frame);
    }

    #[must_use]
    pub fn with_calibration(mut self, calibration: CalibrationBundle) -> Self {
        self.calibration = Some(calibration);
        self
    }

    fn reindex(&mut self) {
        self.populated = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_dropped())
            .map(|(i, _)| i)
            .collect();
    }

    /// Load a session from disk.
    pub fn load(path: impl AsRef<Path>) -> HsiResult<Arc<Self>> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut session: Self = serde_json::from_str(&text)?;
        session.reindex();
        tracing::info!(
            session = %session.name,
            frames = session.frames.len(),
            gaps = session.frames.len() - session.populated.len(),
            references = session.references.len(),
            "Loaded session"
        );
        Ok(Arc::new(session))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> HsiResult<()> {
        let text = serde_json::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl SessionFile for RecordedSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self, item: SessionItemType) -> usize {
        match item {
            SessionItemType::AllFrames => self.frames.len(),
            SessionItemType::NoGaps => self.populated.len(),
            SessionItemType::References => self.references.len(),
        }
    }

    fn measurement(&self, index: usize, item: SessionItemType) -> HsiResult<Frame> {
        let frame = match item {
            SessionItemType::AllFrames => self.frames.get(index),
            SessionItemType::NoGaps => self
                .populated
                .get(index)
                .and_then(|&i| self.frames.get(i)),
            SessionItemType::References => self.references.get(index),
        };
        frame.cloned().ok_or_else(|| {
            HsiError::Configuration(format!(
                "session '{}' has no {:?} item {} (size {})",
                self.name,
                item,
                index,
                self.size(item)
            ))
        })
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn operation_mode(&self) -> OperationMode {
        self.operation_mode
    }

    fn calibration(&self) -> Option<Arc<dyn Calibration>> {
        self.calibration
            .clone()
            .map(|c| Arc::new(c) as Arc<dyn Calibration>)
    }
}
