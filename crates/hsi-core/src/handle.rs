//! Handles for deferred hardware operations.
//!
//! Every asynchronous setting change or capture is represented by an
//! [`AsyncHandle`] on the caller's side and a [`Completer`] on the side that
//! executes it. The handle observes the operation through a `watch` channel:
//!
//! ```text
//! Queued ──► InFlight ──► Done(value)
//!    │          │
//!    └──────────┴───────► Overwritten | Failed
//! ```
//!
//! [`AsyncHandle::get`] maps a wait that elapses while the operation is still
//! queued to [`AsyncState::Deferred`], and one that elapses after the hardware
//! accepted it to [`AsyncState::Timeout`]. Terminal outcomes are cached, so a
//! handle never reverts once it has reported `Done` or `Overwritten`.
//!
//! A handle may hold a pending-operation slot borrowed from a
//! [`hsi_pool::Pool`]; dropping the handle returns the slot.

use crate::error::{HardwareError, HardwareErrorKind, HsiError, HsiResult};
use crate::wait::Wait;
use hsi_pool::{Loaned, Pool};
use tokio::sync::watch;

/// Tracking record held in a pending-operation slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingOperation {
    pub id: u64,
    pub operation: String,
}

/// Pool of pending-operation slots.
pub type SlotPool = Pool<PendingOperation>;

/// Build a slot pool of the given size.
pub fn slot_pool(size: usize) -> std::sync::Arc<SlotPool> {
    Pool::new(size, "pending_operations")
}

/// What `get` observed.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncState<T> {
    /// The operation completed; captures carry their frame.
    Done(T),
    /// Still queued behind the hardware; retry later.
    Deferred,
    /// A newer request for the same channel replaced this one. Terminal.
    Overwritten,
    /// The hardware accepted the operation but it did not finish in time.
    Timeout,
}

impl<T> AsyncState<T> {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, AsyncState::Done(_) | AsyncState::Overwritten)
    }

    #[must_use]
    pub fn into_done(self) -> Option<T> {
        match self {
            AsyncState::Done(v) => Some(v),
            _ => None,
        }
    }
}

/// Progress of an operation as published by its executor.
#[derive(Debug, Clone)]
enum Resolution<T> {
    Queued,
    InFlight,
    Done(T),
    Overwritten,
    Failed(HardwareError),
}

impl<T> Resolution<T> {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Resolution::Done(_) | Resolution::Overwritten | Resolution::Failed(_)
        )
    }
}

/// Create a linked completer/handle pair for one operation.
pub fn pending<T: Clone>(operation: impl Into<String>) -> (Completer<T>, AsyncHandle<T>) {
    let operation = operation.into();
    let (tx, rx) = watch::channel(Resolution::Queued);
    (
        Completer {
            tx,
            operation: operation.clone(),
        },
        AsyncHandle {
            rx,
            operation,
            cached: None,
            slot: None,
        },
    )
}

/// Executor side of an operation.
///
/// Dropping a completer without resolving it fails the handle with an
/// `Abandoned` hardware error.
#[derive(Debug)]
pub struct Completer<T> {
    tx: watch::Sender<Resolution<T>>,
    operation: String,
}

impl<T> Completer<T> {
    /// The hardware accepted the operation.
    pub fn dispatched(&self) {
        self.tx.send_if_modified(|r| {
            if matches!(r, Resolution::Queued) {
                *r = Resolution::InFlight;
                true
            } else {
                false
            }
        });
    }

    pub fn complete(self, value: T) {
        self.tx.send_replace(Resolution::Done(value));
    }

    pub fn overwrite(self) {
        self.tx.send_replace(Resolution::Overwritten);
    }

    pub fn fail(self, error: HardwareError) {
        self.tx.send_replace(Resolution::Failed(error));
    }

    /// Whether the caller has already released its handle.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.tx.is_closed()
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

/// Caller side of an operation.
#[derive(Debug)]
pub struct AsyncHandle<T> {
    rx: watch::Receiver<Resolution<T>>,
    operation: String,
    cached: Option<Result<AsyncState<T>, HardwareError>>,
    slot: Option<Loaned<PendingOperation>>,
}

impl<T: Clone> AsyncHandle<T> {
    /// Attach the pending-operation slot this handle keeps alive.
    #[must_use]
    pub fn with_slot(mut self, slot: Loaned<PendingOperation>) -> Self {
        self.slot = Some(slot);
        self
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Whether this handle still holds a pending-operation slot.
    #[must_use]
    pub fn holds_slot(&self) -> bool {
        self.slot.is_some()
    }

    /// Wait up to `wait` for the operation to resolve.
    ///
    /// Hardware failures surface as `Err`; everything else is an
    /// [`AsyncState`].
    pub async fn get(&mut self, wait: Wait) -> HsiResult<AsyncState<T>> {
        if let Some(cached) = &self.cached {
            return cached.clone().map_err(HsiError::from);
        }

        let rx = &mut self.rx;
        // Ready, sender dropped, or the wait elapsed.
        let _ = wait
            .run(async { rx.wait_for(Resolution::is_terminal).await.map(|_| ()) })
            .await;

        let current = self.rx.borrow().clone();
        let state = match current {
            Resolution::Queued => Ok(AsyncState::Deferred),
            Resolution::InFlight => Ok(AsyncState::Timeout),
            Resolution::Done(v) => Ok(AsyncState::Done(v)),
            Resolution::Overwritten => Ok(AsyncState::Overwritten),
            Resolution::Failed(e) => Err(e),
        };

        let state = match state {
            // The executor went away without resolving.
            Ok(AsyncState::Deferred | AsyncState::Timeout) if self.rx.has_changed().is_err() => {
                Err(HardwareError::new(
                    self.operation.clone(),
                    HardwareErrorKind::Abandoned,
                    "operation abandoned before completion",
                ))
            }
            other => other,
        };

        let terminal = match &state {
            Ok(s) => s.is_terminal(),
            Err(_) => true,
        };
        if terminal {
            self.cached = Some(state.clone());
            // Terminal: the hardware no longer tracks this operation.
            self.slot = None;
        }
        state.map_err(HsiError::from)
    }

    /// Single non-blocking check.
    pub async fn poll(&mut self) -> HsiResult<AsyncState<T>> {
        self.get(Wait::Poll).await
    }

    /// Release the handle and its slot.
    pub fn release(self) {
        drop(self);
    }
}
