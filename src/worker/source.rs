//! The single frame source a worker reads from.

use crate::acquisition::AcquisitionContext;
use hsi_core::{Frame, HsiResult, SessionFile, SessionItemType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Replay progress reported by `query_session_progress`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub in_progress: bool,
    pub frames_read: usize,
    pub frames_total: usize,
}

/// Read position within an attached session.
pub(crate) struct SessionCursor {
    file: Arc<dyn SessionFile>,
    item: SessionItemType,
    /// `(frames_read, frames_total)`, updated together.
    position: Mutex<(usize, usize)>,
    done: watch::Sender<bool>,
}

impl SessionCursor {
    pub fn new(file: Arc<dyn SessionFile>, skip_dropped_frames: bool) -> Self {
        let item = if skip_dropped_frames {
            SessionItemType::NoGaps
        } else {
            SessionItemType::AllFrames
        };
        let total = file.size(item);
        let (done, _) = watch::channel(total == 0);
        Self {
            file,
            item,
            position: Mutex::new((0, total)),
            done,
        }
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    /// Next item, or `None` once every item has been read.
    pub fn next(&self) -> Option<HsiResult<Frame>> {
        let mut position = self.position.lock();
        let (read, total) = *position;
        if read >= total {
            return None;
        }
        let frame = self.file.measurement(read, self.item);
        position.0 = read + 1;
        if position.0 == total {
            info!(session = %self.file.name(), frames = total, "Session replay exhausted");
            self.done.send_replace(true);
        }
        Some(frame)
    }

    pub fn progress(&self) -> SessionProgress {
        let (read, total) = *self.position.lock();
        SessionProgress {
            in_progress: read < total,
            frames_read: read,
            frames_total: total,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        let (read, total) = *self.position.lock();
        read >= total
    }

    /// Resolves with the number of frames read once the session is exhausted.
    pub async fn wait_done(&self) -> usize {
        let mut done = self.done.subscribe();
        // The sender lives in `self`, which outlives this borrow.
        let _ = done.wait_for(|d| *d).await;
        self.progress().frames_read
    }
}

/// What the worker's feeder reads from.
#[derive(Clone, Default)]
pub(crate) enum Source {
    #[default]
    None,
    Acquisition(Arc<AcquisitionContext>),
    Session(Arc<SessionCursor>),
}

impl Source {
    pub fn label(&self) -> &'static str {
        match self {
            Source::None => "none",
            Source::Acquisition(_) => "acquisition",
            Source::Session(_) => "session",
        }
    }

    /// Next available frame, without waiting.
    pub fn poll_next(&self) -> Option<HsiResult<Frame>> {
        match self {
            Source::None => None,
            Source::Acquisition(ctx) => ctx.try_next_measurement().map(Ok),
            Source::Session(cursor) => cursor.next(),
        }
    }
}
