// eqvio_core/src/sensors/buffer.rs

//! Bounded, time-ordered queues shared between sensor producers and the
//! estimator thread.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::messages::{ImuMeasurement, Timestamped};

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Queued,
    /// The queue was full and its oldest element was dropped.
    EvictedOldest,
}

struct Inner<T> {
    items: VecDeque<T>,
    evicted: u64,
    pushed: u64,
}

/// A mutex-guarded queue kept sorted by timestamp, holding at most `capacity`
/// elements. Pushing into a full queue evicts the oldest element.
pub struct TimeOrderedQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> std::fmt::Debug for TimeOrderedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TimeOrderedQueue")
            .field("len", &inner.items.len())
            .field("capacity", &self.capacity)
            .field("evicted", &inner.evicted)
            .finish()
    }
}

impl<T: Timestamped> TimeOrderedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                evicted: 0,
                pushed: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts in timestamp order. Equal timestamps keep arrival order.
    pub fn push(&self, item: T) -> PushStatus {
        let mut inner = self.inner.lock();
        let t = item.timestamp();
        let pos = inner.items.partition_point(|x| x.timestamp() <= t);
        inner.items.insert(pos, item);
        inner.pushed += 1;

        let status = if inner.items.len() > self.capacity {
            inner.items.pop_front();
            inner.evicted += 1;
            warn!(capacity = self.capacity, evicted = inner.evicted, "queue full, oldest element evicted");
            PushStatus::EvictedOldest
        } else {
            PushStatus::Queued
        };
        drop(inner);
        self.available.notify_all();
        status
    }

    /// Removes the oldest element without waiting.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Blocks until the next push or until `timeout` elapses. Returns whether
    /// anything was pushed in the meantime.
    pub fn wait_for_push(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let seen = inner.pushed;
        while inner.pushed == seen {
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return inner.pushed != seen;
            }
        }
        true
    }

    /// Removes and returns every element with timestamp `<= t`, oldest first.
    pub fn drain_until(&self, t: f64) -> Vec<T> {
        let mut inner = self.inner.lock();
        let n = inner.items.partition_point(|x| x.timestamp() <= t);
        inner.items.drain(..n).collect()
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.inner.lock().items.front().map(|x| x.timestamp())
    }

    pub fn newest_timestamp(&self) -> Option<f64> {
        self.inner.lock().items.back().map(|x| x.timestamp())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Number of elements dropped on overflow since creation.
    pub fn evicted_count(&self) -> u64 {
        self.inner.lock().evicted
    }

    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }
}

impl<T: Timestamped + Clone> TimeOrderedQueue<T> {
    /// A copy of the oldest element, left in place.
    pub fn peek_oldest(&self) -> Option<T> {
        self.inner.lock().items.front().cloned()
    }
}

impl TimeOrderedQueue<ImuMeasurement> {
    /// A sample at exactly `t`, interpolated between the buffered samples
    /// that bracket it. `None` unless the buffer covers `t`.
    pub fn interpolate_at(&self, t: f64) -> Option<ImuMeasurement> {
        let inner = self.inner.lock();
        let after = inner.items.partition_point(|x| x.timestamp < t);
        let b = inner.items.get(after)?;
        if b.timestamp == t {
            return Some(*b);
        }
        let a = inner.items.get(after.checked_sub(1)?)?;
        Some(ImuMeasurement::interpolate(a, b, t))
    }
}
