//! Bounded FIFO shared between producer and consumer tasks.
//!
//! Used for the three acquisition stages and as the storage behind the
//! worker's output queue. Depth and capacity are read and modified under the
//! same lock as push/pop, so `len()` never observes a half-applied operation.
//!
//! Waiters register on a [`Notify`] *before* re-checking the queue, so a push
//! or pop that lands between the check and the await is never missed.

use hsi_core::Wait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// A FIFO with a mutable capacity.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Notify,
    not_full: Notify,
    label: &'static str,
}

impl<T> BoundedQueue<T> {
    /// Create a queue. A capacity of zero is raised to one.
    pub fn new(label: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            label,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.items.len() >= inner.capacity
    }

    /// Change the capacity.
    ///
    /// The depth never exceeds the capacity. With `evict` set, the oldest
    /// entries beyond a lowered capacity are removed and returned. Without
    /// it, a capacity below the current depth is refused with the depth and
    /// nothing changes.
    pub fn resize(&self, capacity: usize, evict: bool) -> Result<Vec<T>, usize> {
        let capacity = capacity.max(1);
        let mut inner = self.inner.lock();
        let depth = inner.items.len();
        if depth > capacity && !evict {
            return Err(depth);
        }
        inner.capacity = capacity;
        let evicted = inner.items.drain(..depth.saturating_sub(capacity)).collect();
        drop(inner);
        self.not_full.notify_waiters();
        Ok(evicted)
    }

    /// Push without waiting. Hands the item back when full or closed.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.closed || inner.items.len() >= inner.capacity {
            return Err(item);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_waiters();
        Ok(())
    }

    /// Push, evicting the oldest entries to stay within capacity.
    ///
    /// Returns what was evicted, oldest first.
    pub fn push_evicting(&self, item: T) -> Vec<T> {
        let mut inner = self.inner.lock();
        let mut evicted = Vec::new();
        while inner.items.len() >= inner.capacity {
            match inner.items.pop_front() {
                Some(old) => evicted.push(old),
                None => break,
            }
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_waiters();
        evicted
    }

    /// Push, waiting up to `wait` for room. Hands the item back if the wait
    /// elapsed or the queue was closed.
    pub async fn push(&self, item: T, wait: Wait) -> Result<(), T> {
        let mut slot = Some(item);
        let attempt = async {
            loop {
                let notified = self.not_full.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                {
                    let mut inner = self.inner.lock();
                    if inner.closed {
                        return false;
                    }
                    if inner.items.len() < inner.capacity {
                        if let Some(item) = slot.take() {
                            inner.items.push_back(item);
                        }
                        drop(inner);
                        self.not_empty.notify_waiters();
                        return true;
                    }
                }
                notified.await;
            }
        };
        match wait.run(attempt).await {
            Some(true) => Ok(()),
            _ => slot.take().map_or(Ok(()), Err),
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_waiters();
        }
        item
    }

    /// Pop the oldest entry, waiting up to `wait` for one to arrive.
    ///
    /// `None` when the wait elapsed, or the queue is closed and empty.
    pub async fn pop(&self, wait: Wait) -> Option<T> {
        let attempt = async {
            loop {
                let notified = self.not_empty.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(item) = self.try_pop() {
                    return Some(item);
                }
                if self.inner.lock().closed {
                    return None;
                }
                notified.await;
            }
        };
        wait.run(attempt).await.flatten()
    }

    /// Drop every queued entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut inner = self.inner.lock();
            let n = inner.items.len();
            inner.items.clear();
            n
        };
        self.not_full.notify_waiters();
        removed
    }

    /// Refuse further pushes and wake every waiter. Queued entries can still
    /// be popped.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedQueue")
            .field("label", &self.label)
            .field("len", &inner.items.len())
            .field("capacity", &inner.capacity)
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_try_push_respects_capacity() {
        let q = BoundedQueue::new("t", 2);
        assert!(q.try_push(1).is_ok());
        assert!(q.try_push(2).is_ok());
        assert_eq!(q.try_push(3), Err(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(1));
    }

    #[test]
    fn test_push_evicting_keeps_newest() {
        let q = BoundedQueue::new("t", 3);
        let mut evicted = Vec::new();
        for i in 1..=5 {
            evicted.extend(q.push_evicting(i));
        }
        assert_eq!(evicted, vec![1, 2]);
        assert_eq!(q.len(), 3);
        let rest: Vec<_> = std::iter::from_fn(|| q.try_pop()).collect();
        assert_eq!(rest, vec![3, 4, 5]);
    }

    #[test]
    fn test_resize_never_leaves_depth_above_capacity() {
        let q = BoundedQueue::new("t", 4);
        for i in 0..4 {
            q.try_push(i).unwrap();
        }
        assert_eq!(q.resize(2, false), Err(4));
        assert_eq!(q.capacity(), 4);
        assert_eq!(q.len(), 4);

        assert_eq!(q.resize(2, true), Ok(vec![0, 1]));
        assert_eq!(q.capacity(), 2);
        assert_eq!(q.len(), 2);
        assert_eq!(q.resize(6, false), Ok(vec![]));
        assert_eq!(q.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn test_pop_poll_and_timeout() {
        let q: BoundedQueue<u8> = BoundedQueue::new("t", 1);
        assert_eq!(q.pop(Wait::Poll).await, None);
        assert_eq!(q.pop(Wait::For(Duration::from_millis(10))).await, None);
        q.try_push(7).unwrap();
        assert_eq!(q.pop(Wait::Poll).await, Some(7));
    }

    #[tokio::test]
    async fn test_push_blocks_until_space() {
        let q = Arc::new(BoundedQueue::new("t", 1));
        q.try_push(1).unwrap();

        let producer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.push(2, Wait::Infinite).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());
        assert_eq!(q.len(), 1);

        assert_eq!(q.pop(Wait::Infinite).await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(q.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn test_push_timeout_returns_item() {
        let q = BoundedQueue::new("t", 1);
        q.try_push(1).unwrap();
        let back = q.push(2, Wait::For(Duration::from_millis(10))).await;
        assert_eq!(back, Err(2));
    }

    #[tokio::test]
    async fn test_close_wakes_consumers() {
        let q: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::new("t", 1));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.pop(Wait::Infinite).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.close();
        assert_eq!(consumer.await.unwrap(), None);
        assert_eq!(q.try_push(1), Err(1));
    }
}
