//! The worker's output queue and its drop policy.
//!
//! `hard_limit` is the queue capacity. At the limit, a push either evicts
//! the oldest unconsumed result (`can_drop`) or waits for the consumer. A
//! push that waits longer than the stall timeout is abandoned and reported
//! to the consumer as [`HsiError::ResourceExhausted`] on its next pop.
//! `soft_limit` is advisory only.

use super::config::QueueLimits;
use crate::queue::BoundedQueue;
use hsi_core::{Frame, HsiError, HsiResult, View, Wait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// One processed frame and its rendered view, if a viewer is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResult {
    pub frame: Frame,
    pub view: Option<View>,
}

/// Queue entry. Per-frame failures travel in-band.
pub(crate) type Entry = HsiResult<WorkerResult>;

/// Re-check period for `can_drop` while a push is blocked.
const BLOCKED_RECHECK: Duration = Duration::from_millis(10);

pub(crate) struct OutputQueue {
    queue: BoundedQueue<Entry>,
    soft_limit: AtomicUsize,
    can_drop: AtomicBool,
    above_soft: AtomicBool,
    stall_timeout: Duration,
    exhausted: Mutex<Option<HsiError>>,
    pub dropped: AtomicU64,
    pub stalled: AtomicU64,
    pub delivered: AtomicU64,
}

impl OutputQueue {
    pub fn new(limits: QueueLimits, can_drop: bool, stall_timeout: Duration) -> Self {
        Self {
            queue: BoundedQueue::new("output", limits.hard_limit),
            soft_limit: AtomicUsize::new(limits.soft_limit),
            can_drop: AtomicBool::new(can_drop),
            above_soft: AtomicBool::new(false),
            stall_timeout,
            exhausted: Mutex::new(None),
            dropped: AtomicU64::new(0),
            stalled: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> QueueLimits {
        QueueLimits {
            soft_limit: self.soft_limit.load(Ordering::Acquire),
            hard_limit: self.queue.capacity(),
        }
    }

    /// Apply new limits. With `can_drop` set, results beyond a lowered hard
    /// limit are dropped at once. Without it, a hard limit below the current
    /// depth is refused and the limits stay as they were.
    pub fn set_limits(&self, limits: QueueLimits) -> HsiResult<()> {
        limits.validate()?;
        let evicted = self
            .queue
            .resize(limits.hard_limit, self.can_drop())
            .map_err(|used| {
                HsiError::Configuration(format!(
                    "hard_limit {} is below the {} results queued and dropping is disabled",
                    limits.hard_limit, used
                ))
            })?;
        self.soft_limit.store(limits.soft_limit, Ordering::Release);
        self.record_drops(evicted);
        Ok(())
    }

    pub fn can_drop(&self) -> bool {
        self.can_drop.load(Ordering::Acquire)
    }

    pub fn set_can_drop(&self, can_drop: bool) {
        self.can_drop.store(can_drop, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.exhausted.lock().is_none()
    }

    fn record_drops(&self, evicted: Vec<Entry>) {
        for old in evicted {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match &old {
                Ok(result) => warn!(
                    frame = %result.frame.name,
                    sequence = result.frame.sequence(),
                    dropped,
                    "Output queue at hard limit, oldest result dropped"
                ),
                Err(e) => warn!(error = %e, dropped, "Output queue at hard limit, oldest error dropped"),
            }
        }
    }

    fn note_depth(&self) {
        let used = self.queue.len();
        let soft = self.soft_limit.load(Ordering::Acquire);
        let above = used > soft;
        if self.above_soft.swap(above, Ordering::AcqRel) != above && above {
            debug!(queue_used = used, soft_limit = soft, "Output queue above soft limit");
        }
    }

    /// Publish a result according to the drop policy.
    pub async fn push(&self, entry: Entry) {
        let mut entry = entry;
        let deadline = Instant::now() + self.stall_timeout;
        loop {
            if self.can_drop() {
                let evicted = self.queue.push_evicting(entry);
                self.record_drops(evicted);
                self.note_depth();
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice = remaining.min(BLOCKED_RECHECK);
            match self.queue.push(entry, Wait::For(slice)).await {
                Ok(()) => {
                    self.note_depth();
                    return;
                }
                Err(back) if self.queue.is_closed() => {
                    debug!(ok = back.is_ok(), "Output queue closed, result discarded");
                    return;
                }
                Err(back) if remaining.is_zero() => {
                    self.stall(back);
                    return;
                }
                Err(back) => entry = back,
            }
        }
    }

    fn stall(&self, entry: Entry) {
        let stalled = self.stalled.fetch_add(1, Ordering::Relaxed) + 1;
        let limits = self.limits();
        let name = entry.as_ref().map(|r| r.frame.name.clone()).ok();
        error!(
            frame = name.as_deref().unwrap_or("<error>"),
            hard_limit = limits.hard_limit,
            stall_timeout_ms = self.stall_timeout.as_millis() as u64,
            stalled,
            "Consumer made no progress, result abandoned"
        );
        let mut slot = self.exhausted.lock();
        if slot.is_none() {
            *slot = Some(HsiError::exhausted(
                "output_queue",
                format!(
                    "hard limit {} reached and no result consumed within {} ms",
                    limits.hard_limit,
                    self.stall_timeout.as_millis()
                ),
            ));
        }
    }

    /// Pop the oldest entry, reporting a pending exhaustion first.
    pub async fn pop(&self, wait: Wait) -> Option<Entry> {
        if let Some(err) = self.exhausted.lock().take() {
            return Some(Err(err));
        }
        let entry = self.queue.pop(wait).await?;
        if entry.is_ok() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        self.note_depth();
        Some(entry)
    }

    /// Drop everything queued, including a pending exhaustion report.
    pub fn clear(&self) -> usize {
        self.exhausted.lock().take();
        self.queue.clear()
    }
}
