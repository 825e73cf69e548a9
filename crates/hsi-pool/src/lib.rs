//! Bounded slot pool with RAII loans.
//!
//! Every asynchronous hardware operation occupies one tracking slot for as long
//! as its handle is alive. The pool caps how many such operations can be
//! outstanding and hands each one a [`Loaned`] guard that returns the slot on
//! drop, on every exit path.
//!
//! Free slots sit in a lock-free queue; a semaphore counts them. A permit is
//! handed back only after its slot is queued again, so holding a permit always
//! means a slot can be popped. Lending never waits: a caller that finds the
//! pool empty gets `None` and decides how to report it.
//!
//! # Example
//!
//! ```
//! use hsi_pool::Pool;
//!
//! let pool: std::sync::Arc<Pool<u64>> = Pool::new(2, "tickets");
//!
//! let mut slot = pool.try_acquire().unwrap();
//! *slot = 42;
//! let _other = pool.try_acquire().unwrap();
//! assert!(pool.try_acquire().is_none());
//!
//! drop(slot);
//! assert_eq!(pool.in_use(), 1);
//! // Returned slots come back cleared.
//! assert_eq!(*pool.try_acquire().unwrap(), 0);
//! ```

use crossbeam_queue::SegQueue;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Fixed number of reusable slots. A returned slot is reset to
/// `T::default()` before anyone else can borrow it.
pub struct Pool<T> {
    free: SegQueue<T>,
    permits: Semaphore,
    size: usize,
    label: &'static str,
}

impl<T: Default + Send + 'static> Pool<T> {
    /// Create a pool of `size` default slots, named `label` in logs.
    ///
    /// A `size` of zero is raised to one.
    pub fn new(size: usize, label: &'static str) -> Arc<Self> {
        let size = size.max(1);
        let free = SegQueue::new();
        (0..size).for_each(|_| free.push(T::default()));
        Arc::new(Self {
            free,
            permits: Semaphore::new(size),
            size,
            label,
        })
    }

    /// Borrow a free slot, or `None` when every slot is on loan.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<Loaned<T>> {
        let Ok(permit) = self.permits.try_acquire() else {
            debug!(pool = self.label, size = self.size, "Every slot is on loan");
            return None;
        };
        permit.forget();
        Some(Loaned {
            pool: Arc::clone(self),
            // A held permit guarantees a queued slot.
            item: Some(self.free.pop().unwrap_or_default()),
        })
    }

    fn give_back(&self, mut item: T) {
        std::mem::take(&mut item);
        self.free.push(item);
        self.permits.add_permits(1);
    }
}

impl<T> Pool<T> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Total number of slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots free to lend.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Slots currently on loan.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available())
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("label", &self.label)
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}

/// A slot on loan from a [`Pool`]. Dropping it returns the slot.
pub struct Loaned<T: Default + Send + 'static> {
    pool: Arc<Pool<T>>,
    item: Option<T>,
}

impl<T: Default + Send + 'static> Deref for Loaned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("slot read after return"),
        }
    }
}

impl<T: Default + Send + 'static> DerefMut for Loaned<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("slot written after return"),
        }
    }
}

impl<T: Default + Send + std::fmt::Debug + 'static> std::fmt::Debug for Loaned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Loaned").field(&self.item).finish()
    }
}

impl<T: Default + Send + 'static> Drop for Loaned<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}
