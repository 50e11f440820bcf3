//! Bounded, drop-policy-aware FIFO queue (`spec.md` §4.1).
//!
//! This is the primitive every inter-task handoff in the pipeline rests on.
//! `put` never suspends the caller — under load it drops according to the
//! configured [`OverflowPolicy`] instead of blocking, which is what lets a
//! slow subscriber fail to keep up without ever back-pressuring the
//! publisher (`spec.md` §5: "`queue.put` never suspends the producer").

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// What happens to a `put` when the queue is already at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item(s) to make room for the new one.
    #[default]
    DropOldest,
    /// Reject the incoming item, leaving the queue unchanged.
    DropNewest,
}

/// Outcome of a [`BoundedQueue::put`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// The item was enqueued without eviction.
    Accepted,
    /// Policy was `drop_newest` and the queue was full; the incoming item was discarded.
    DroppedNew,
    /// Policy was `drop_oldest`; `n` existing items were evicted to make room (`n >= 1`).
    DroppedOld(usize),
}

/// Sentinel returned by [`BoundedQueue::take`] once the queue has been closed
/// and drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A FIFO queue with a hard capacity and a configurable overflow policy.
///
/// Safe for any number of concurrent producers and consumers. `take` blocks
/// the calling task (via `tokio::sync::Notify`, never a busy loop) until an
/// item is available or the queue is closed.
pub struct BoundedQueue<T> {
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<Inner<T>>,
    notify: Notify,
    drops_dropped_old: AtomicU64,
    drops_dropped_new: AtomicU64,
    delivered: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Creates a new queue. `capacity` must be at least 1.
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
            }),
            notify: Notify::new(),
            drops_dropped_old: AtomicU64::new(0),
            drops_dropped_new: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Configured maximum length.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items discarded under the `drop_oldest` policy (across all puts).
    #[must_use]
    pub fn drops_dropped_old(&self) -> u64 {
        self.drops_dropped_old.load(Ordering::Relaxed)
    }

    /// Total items rejected under the `drop_newest` policy.
    #[must_use]
    pub fn drops_dropped_new(&self) -> u64 {
        self.drops_dropped_new.load(Ordering::Relaxed)
    }

    /// Total drops of either policy, for a single "drops_total" observability counter.
    #[must_use]
    pub fn drops_total(&self) -> u64 {
        self.drops_dropped_old() + self.drops_dropped_new()
    }

    /// Total items that were successfully taken by a consumer.
    #[must_use]
    pub fn delivered_total(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Enqueues `item`. Never blocks.
    pub fn put(&self, item: T) -> PutResult {
        let mut guard = self.inner.lock();
        if guard.closed {
            // A closed queue silently discards further puts; nothing can drain it.
            return PutResult::DroppedNew;
        }

        let result = if guard.items.len() < self.capacity {
            guard.items.push_back(item);
            PutResult::Accepted
        } else {
            match self.policy {
                OverflowPolicy::DropNewest => {
                    self.drops_dropped_new.fetch_add(1, Ordering::Relaxed);
                    PutResult::DroppedNew
                }
                OverflowPolicy::DropOldest => {
                    let mut evicted = 0usize;
                    while guard.items.len() >= self.capacity {
                        guard.items.pop_front();
                        evicted += 1;
                    }
                    guard.items.push_back(item);
                    self.drops_dropped_old
                        .fetch_add(evicted as u64, Ordering::Relaxed);
                    PutResult::DroppedOld(evicted)
                }
            }
        };
        drop(guard);
        self.notify.notify_one();
        result
    }

    /// Suspends until an item is available, or returns `Err(Closed)` once the
    /// queue has been closed and drained.
    pub async fn take(&self) -> Result<T, Closed> {
        loop {
            {
                let mut guard = self.inner.lock();
                if let Some(item) = guard.items.pop_front() {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return Ok(item);
                }
                if guard.closed {
                    return Err(Closed);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks the queue closed and wakes every suspended taker. Idempotent.
    pub fn close(&self) {
        let mut guard = self.inner.lock();
        if guard.closed {
            return;
        }
        guard.closed = true;
        drop(guard);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Removes every queued item for which `should_drop` returns `true`,
    /// preserving FIFO order of what remains. Returns the number removed.
    /// Used by the pipeline actuator's `drop_outbound_audio` to empty
    /// already-queued audio frames without touching other frame kinds.
    pub fn retain<F>(&self, mut should_drop: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut guard = self.inner.lock();
        let before = guard.items.len();
        guard.items.retain(|item| !should_drop(item));
        before - guard.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn len_never_exceeds_capacity_drop_oldest() {
        let q: BoundedQueue<i32> = BoundedQueue::new(3, OverflowPolicy::DropOldest);
        for i in 0..10 {
            q.put(i);
            assert!(q.len() <= 3);
        }
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn drop_oldest_evicts_head_and_keeps_tail() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2, OverflowPolicy::DropOldest);
        q.put(1);
        q.put(2);
        let r = q.put(3);
        assert!(matches!(r, PutResult::DroppedOld(1)));
        assert_eq!(q.drops_dropped_old(), 1);
    }

    #[test]
    fn drop_newest_rejects_incoming_when_full() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2, OverflowPolicy::DropNewest);
        q.put(1);
        q.put(2);
        let r = q.put(3);
        assert_eq!(r, PutResult::DroppedNew);
        assert_eq!(q.drops_dropped_new(), 1);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn take_preserves_fifo_order() {
        let q: BoundedQueue<i32> = BoundedQueue::new(8, OverflowPolicy::DropOldest);
        q.put(1);
        q.put(2);
        q.put(3);
        assert_eq!(q.take().await, Ok(1));
        assert_eq!(q.take().await, Ok(2));
        assert_eq!(q.take().await, Ok(3));
    }

    #[tokio::test]
    async fn take_on_empty_then_close_returns_sentinel_without_blocking() {
        let q: Arc<BoundedQueue<i32>> = Arc::new(BoundedQueue::new(4, OverflowPolicy::DropOldest));
        q.close();
        let result = tokio::time::timeout(std::time::Duration::from_millis(50), q.take()).await;
        assert_eq!(result.expect("should not block"), Err(Closed));
    }

    #[tokio::test]
    async fn take_blocks_until_item_is_put() {
        let q: Arc<BoundedQueue<i32>> = Arc::new(BoundedQueue::new(4, OverflowPolicy::DropOldest));
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.take().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.put(42);
        let result = tokio::time::timeout(std::time::Duration::from_millis(200), handle)
            .await
            .expect("task should finish")
            .expect("task should not panic");
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn retain_removes_only_matching_items_and_keeps_order() {
        let q: BoundedQueue<i32> = BoundedQueue::new(8, OverflowPolicy::DropOldest);
        for i in 1..=5 {
            q.put(i);
        }
        let removed = q.retain(|&item| item % 2 == 0);
        assert_eq!(removed, 2);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn puts_equal_deliveries_plus_drops() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2, OverflowPolicy::DropOldest);
        let mut puts = 0u64;
        for i in 0..5 {
            q.put(i);
            puts += 1;
        }
        assert_eq!(puts, q.len() as u64 + q.drops_total());
    }
}
