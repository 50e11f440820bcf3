//! Named fan-out publisher with per-subscriber bounded queues (`spec.md` §4.2).
//!
//! Each subscriber gets its own [`BoundedQueue`] and a pool of worker tasks
//! draining it into a handler closure. `publish` enqueues into every
//! subscriber's queue independently — a slow subscriber only drops its own
//! backlog under its own overflow policy; it can never starve or block
//! another subscriber on the same bus, nor the publisher itself.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt as _;
use parking_lot::Mutex;

use super::queue::{BoundedQueue, OverflowPolicy};
use crate::runtime::TaskSpawner;

type HandlerFn<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// One registered subscriber: its queue, the handler it drains into, and the
/// join handles of its worker tasks (used only to detect abandonment at
/// shutdown; the queue close is what actually wakes them).
struct HandlerRegistration<T> {
    name: String,
    queue: Arc<BoundedQueue<T>>,
    worker_count: usize,
    started: AtomicBool,
}

/// A named event bus. `T` is the message type flowing through every
/// subscriber registered on this bus (e.g. the decoded inbound envelope for
/// `acs_inbound`).
pub struct EventBus<T> {
    name: &'static str,
    handlers: Mutex<Vec<Arc<HandlerRegistration<T>>>>,
}

impl<T> EventBus<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers a new subscriber and spawns its `concurrency` worker tasks.
    /// Append-only: returns `Err` if `name` is already registered.
    ///
    /// Each worker loops `item = queue.take(); handler_fn(item).await` until
    /// the queue is closed. A handler that panics is caught at the worker
    /// shell, logged with the bus/handler name, and the worker keeps running
    /// — per `spec.md` §4.2/§7, exceptions never propagate to the publisher
    /// or to sibling handlers.
    pub fn subscribe<F, Fut>(
        &self,
        name: impl Into<String>,
        capacity: usize,
        overflow_policy: OverflowPolicy,
        concurrency: usize,
        spawner: &dyn TaskSpawner,
        handler_fn: F,
    ) -> Result<(), String>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let concurrency = concurrency.max(1);
        let mut handlers = self.handlers.lock();
        if handlers.iter().any(|h| h.name == name) {
            return Err(format!(
                "handler '{name}' already registered on bus '{}'",
                self.name
            ));
        }

        let queue = Arc::new(BoundedQueue::new(capacity, overflow_policy));
        let handler_fn: HandlerFn<T> = Arc::new(move |item| Box::pin(handler_fn(item)));
        let registration = Arc::new(HandlerRegistration {
            name: name.clone(),
            queue: queue.clone(),
            worker_count: concurrency,
            started: AtomicBool::new(true),
        });

        for worker_idx in 0..concurrency {
            let queue = queue.clone();
            let handler_fn = handler_fn.clone();
            let bus_name = self.name;
            let handler_name = name.clone();
            spawner.spawn(Box::pin(async move {
                loop {
                    match queue.take().await {
                        Ok(item) => {
                            let fut = handler_fn(item);
                            if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                                log::error!(
                                    "[bus:{bus_name}] handler '{handler_name}' worker {worker_idx} panicked: {}; dropping item and continuing",
                                    panic_message(&panic)
                                );
                            }
                        }
                        Err(_closed) => {
                            log::trace!(
                                "[bus:{bus_name}] handler '{handler_name}' worker {worker_idx} exiting: queue closed"
                            );
                            break;
                        }
                    }
                }
            }));
        }

        handlers.push(registration);
        Ok(())
    }

    /// Publishes `item` to every registered handler's queue. Non-blocking:
    /// each enqueue either succeeds or drops per that handler's policy, and
    /// this function never awaits queue space.
    pub fn publish(&self, item: T) {
        let handlers = self.handlers.lock();
        for handler in handlers.iter() {
            let result = handler.queue.put(item.clone());
            if !matches!(result, super::queue::PutResult::Accepted) {
                log::warn!(
                    "[bus:{}] handler '{}' dropped a message ({:?}); drops_total={}",
                    self.name,
                    handler.name,
                    result,
                    handler.queue.drops_total()
                );
            }
        }
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Removes queued items matching `should_drop` from a single named
    /// handler's queue, without touching other handlers on this bus.
    /// Returns the number removed, or `None` if no handler with that name
    /// is registered.
    pub fn drain_handler_queue<F>(&self, handler_name: &str, should_drop: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        let handlers = self.handlers.lock();
        handlers
            .iter()
            .find(|h| h.name == handler_name)
            .map(|h| h.queue.retain(should_drop))
    }

    /// Closes every handler's queue (waking its workers) and waits up to
    /// `deadline` for outstanding items to drain. Workers still running after
    /// the deadline are abandoned (their queue is closed, so they will exit
    /// on their next `take`; this call does not block past the deadline).
    pub async fn shutdown(&self, deadline: Duration) {
        let handlers: Vec<_> = self.handlers.lock().iter().cloned().collect();
        for handler in &handlers {
            handler.queue.close();
        }

        let start = std::time::Instant::now();
        loop {
            let all_drained = handlers.iter().all(|h| h.queue.is_empty());
            if all_drained || start.elapsed() >= deadline {
                if !all_drained {
                    log::warn!(
                        "[bus:{}] shutdown deadline exceeded with items still queued",
                        self.name
                    );
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for handler in &handlers {
            handler.started.store(false, Ordering::Relaxed);
            let _ = handler.worker_count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn publish_delivers_in_order_to_each_subscriber() {
        let bus: EventBus<i32> = EventBus::new("test");
        let spawner = TokioSpawner::current();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe(
            "collector",
            16,
            OverflowPolicy::DropOldest,
            1,
            &spawner,
            move |item: i32| {
                let seen2 = seen2.clone();
                async move {
                    seen2.lock().push(item);
                }
            },
        )
        .unwrap();

        for i in 0..5 {
            bus.publish(i);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn duplicate_subscriber_name_is_rejected() {
        let bus: EventBus<i32> = EventBus::new("test");
        let spawner = TokioSpawner::current();
        bus.subscribe("h", 4, OverflowPolicy::DropOldest, 1, &spawner, |_: i32| async {})
            .unwrap();
        let err = bus
            .subscribe("h", 4, OverflowPolicy::DropOldest, 1, &spawner, |_: i32| async {})
            .unwrap_err();
        assert!(err.contains("already registered"));
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_publish_or_other_subscribers() {
        let bus: EventBus<i32> = EventBus::new("test");
        let spawner = TokioSpawner::current();
        let fast_count = Arc::new(AtomicUsize::new(0));
        let fast_count2 = fast_count.clone();

        bus.subscribe("fast", 64, OverflowPolicy::DropOldest, 1, &spawner, move |_: i32| {
            let fast_count2 = fast_count2.clone();
            async move {
                fast_count2.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        bus.subscribe("slow", 1, OverflowPolicy::DropOldest, 1, &spawner, |_: i32| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .unwrap();

        let start = std::time::Instant::now();
        for i in 0..20 {
            bus.publish(i);
        }
        assert!(start.elapsed() < Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fast_count.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn panicking_handler_is_caught_and_worker_keeps_running() {
        let bus: EventBus<i32> = EventBus::new("test");
        let spawner = TokioSpawner::current();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();

        bus.subscribe("flaky", 16, OverflowPolicy::DropOldest, 1, &spawner, move |item: i32| {
            let seen2 = seen2.clone();
            async move {
                if item == 1 {
                    panic!("boom");
                }
                seen2.lock().push(item);
            }
        })
        .unwrap();

        for i in 0..3 {
            bus.publish(i);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec![0, 2]);
    }

    #[tokio::test]
    async fn shutdown_closes_handler_queues() {
        let bus: EventBus<i32> = EventBus::new("test");
        let spawner = TokioSpawner::current();
        bus.subscribe("h", 4, OverflowPolicy::DropOldest, 1, &spawner, |_: i32| async {})
            .unwrap();
        bus.shutdown(Duration::from_millis(200)).await;
    }
}
