//! Small in-memory sessions for replay and pipeline tests.

use hsi_core::{
    CalibrationBundle, Frame, ImageBuffer, OperationMode, RecordedSession, SessionInfo,
};
use std::sync::Arc;

use crate::pattern::{spectral_scene, wavelength_axis};

const WIDTH: u32 = 4;
const HEIGHT: u32 = 2;
const CHANNELS: usize = 3;

fn buffer(data: Vec<f32>) -> Option<ImageBuffer> {
    ImageBuffer::new(WIDTH, HEIGHT, wavelength_axis(500.0, 700.0, CHANNELS), data).ok()
}

fn flat(value: f32) -> Option<ImageBuffer> {
    buffer(vec![value; WIDTH as usize * HEIGHT as usize * CHANNELS])
}

/// A session of `count` slots named `name`, with the slots listed in `gaps`
/// recorded as dropped placeholders.
///
/// Frames carry sequence numbers `1..=count`, 10 ms integration time and
/// calibration id `"synthetic"`. Dark and white references and a
/// calibration bundle are stored with the session.
pub fn synthetic_session(name: &str, count: usize, gaps: &[usize]) -> Arc<RecordedSession> {
    let wavelengths = wavelength_axis(500.0, 700.0, CHANNELS);
    let mut session = RecordedSession::new(name, 10.0, OperationMode::Internal)
        .with_calibration(CalibrationBundle::new("synthetic"));

    for idx in 0..count {
        let info = SessionInfo::new(name, 1, idx as u64 + 1);
        let frame_name = format!("{}_{:04}", name, idx + 1);
        let raw = if gaps.contains(&idx) {
            None
        } else {
            buffer(spectral_scene(
                WIDTH,
                HEIGHT,
                &wavelengths,
                idx as u64,
                10.0,
                1.0,
                true,
            ))
        };
        let frame = match raw {
            Some(raw) => Frame::new(frame_name, info, raw)
                .with_integration_time(10.0)
                .with_calibration("synthetic"),
            None => Frame::dropped(frame_name, info),
        };
        session.push(frame);
    }

    let references = [("dark", 5.0f32), ("white", 2_000.0)];
    for (kind, level) in references {
        if let Some(raw) = flat(level) {
            session.push_reference(
                Frame::new(kind, SessionInfo::new(name, 1, 0), raw).with_integration_time(10.0),
            );
        }
    }
    Arc::new(session)
}
