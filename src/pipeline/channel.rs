//! Bounded drop-oldest channel used at every hand-off point.
//!
//! `BoundedChannel<T>` is a fixed-capacity FIFO. Pushing into a full channel
//! never blocks and never fails: the `drop_count` oldest elements are
//! evicted first and counted as dropped. Every operation takes the internal
//! mutex once, so each push/pop/evict is atomic on its own.
//!
//! Compound "check, then drain" sequences that span more than one call
//! (the acquisition worker's overflow eviction racing a manual consumer or a
//! batch pop) are serialised with a [`DrainLock`] shared by all drainers.

use crate::types::{Frame, FrameShape};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Channel of frames, the common case
pub type FrameChannel = BoundedChannel<Frame>;

/// Channel of shapes, the auxiliary channel of the shared region
pub type ShapeChannel = BoundedChannel<FrameShape>;

/// Fixed-capacity FIFO with a drop-oldest overflow policy.
#[derive(Debug)]
pub struct BoundedChannel<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    drop_count: AtomicUsize,
    dropped: AtomicU64,
    pushed: AtomicU64,
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` elements, evicting
    /// `drop_count` oldest elements per overflow. Both are clamped to at least 1.
    pub fn new(capacity: usize, drop_count: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            drop_count: AtomicUsize::new(drop_count.max(1)),
            dropped: AtomicU64::new(0),
            pushed: AtomicU64::new(0),
        }
    }

    /// Convenience constructor returning a shareable handle
    pub fn shared(capacity: usize, drop_count: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity, drop_count))
    }

    /// Insert at the back, evicting the oldest `drop_count` elements first if full.
    ///
    /// Returns the number of elements evicted to make room.
    pub fn push(&self, item: T) -> usize {
        let mut queue = self.queue.lock();
        let evicted = if queue.len() >= self.capacity {
            let n = self.drop_count().min(queue.len());
            queue.drain(..n);
            n
        } else {
            0
        };
        queue.push_back(item);
        drop(queue);

        if evicted > 0 {
            self.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    /// Remove and return the oldest element, if any
    pub fn pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Remove exactly `n` oldest elements in FIFO order, or nothing if fewer
    /// than `n` are queued.
    pub fn pop_exact(&self, n: usize) -> Option<Vec<T>> {
        let mut queue = self.queue.lock();
        if n == 0 || queue.len() < n {
            return None;
        }
        Some(queue.drain(..n).collect())
    }

    /// Evict up to `n` oldest elements, counting them as dropped.
    pub fn evict_oldest(&self, n: usize) -> usize {
        let mut queue = self.queue.lock();
        let n = n.min(queue.len());
        queue.drain(..n);
        drop(queue);
        if n > 0 {
            self.dropped.fetch_add(n as u64, Ordering::Relaxed);
        }
        n
    }

    /// Evict the configured `drop_count` if the channel is full.
    ///
    /// Check and eviction happen under the same lock acquisition.
    pub fn evict_if_full(&self) -> usize {
        self.evict_oldest_if_full(self.drop_count())
    }

    /// Evict up to `n` oldest elements, but only if the channel is full.
    ///
    /// Check and eviction happen under the same lock acquisition, so a
    /// concurrent `pop` cannot turn into an extra eviction.
    pub fn evict_oldest_if_full(&self, n: usize) -> usize {
        let mut queue = self.queue.lock();
        if queue.len() < self.capacity {
            return 0;
        }
        let n = n.min(queue.len());
        queue.drain(..n);
        drop(queue);
        if n > 0 {
            self.dropped.fetch_add(n as u64, Ordering::Relaxed);
        }
        n
    }

    /// Remove everything without counting it as dropped. Returns how many were removed.
    pub fn flush(&self) -> usize {
        let mut queue = self.queue.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    /// Remove everything and hand it back, oldest first
    pub fn drain_all(&self) -> Vec<T> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.lock().len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn drop_count(&self) -> usize {
        self.drop_count.load(Ordering::Relaxed)
    }

    /// Change how many elements are evicted per overflow (clamped to at least 1)
    pub fn set_drop_count(&self, n: usize) {
        self.drop_count.store(n.max(1), Ordering::Relaxed);
    }

    /// Total elements evicted by the overflow policy since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total elements ever pushed
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

impl<T: Clone> BoundedChannel<T> {
    /// Copy of the most recently inserted element still in the channel.
    ///
    /// Does not remove anything and does not take part in FIFO order.
    pub fn peek_latest(&self) -> Option<T> {
        self.queue.lock().back().cloned()
    }
}

/// Advisory lock around compound drain operations on a shared channel.
///
/// Cloning shares the same underlying lock.
#[derive(Debug, Clone, Default)]
pub struct DrainLock(Arc<Mutex<()>>);

impl DrainLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the lock for the duration of the returned guard
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
}
