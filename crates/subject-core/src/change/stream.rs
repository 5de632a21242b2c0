//! Change publication: a synchronous, non-dropping push fan-out plus
//! cancellable, bounded pull subscriptions.
//!
//! `spec.md` §4.F distinguishes two consumption styles. Push observers are
//! registered once and must see every change — no subscriber can cause
//! another to miss an update, so publication is a synchronous call into
//! each observer in turn. Pull subscriptions hand back a queue a consumer
//! drains at its own pace; multiple writers publish into it (multi-producer)
//! and one task drains it (single-consumer). `spec.md` §5: "back-pressure is
//! the consumer's responsibility" — a queue at capacity blocks the publisher
//! on a condition variable until the consumer makes room or the subscription
//! closes, rather than discarding the record that doesn't fit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::change::record::ChangeRecord;

type Observer = Arc<dyn Fn(&ChangeRecord) + Send + Sync>;

struct BoundedQueue {
    capacity: usize,
    state: Mutex<VecDeque<ChangeRecord>>,
    space_available: Condvar,
    notify: Notify,
    closed: AtomicBool,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(VecDeque::new()),
            space_available: Condvar::new(),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Blocks the calling (publisher) thread until the queue has room or is
    /// closed. Never drops a record to make space.
    fn push(&self, record: ChangeRecord) {
        let mut queue = self.state.lock();
        while queue.len() >= self.capacity {
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            self.space_available.wait(&mut queue);
        }
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        queue.push_back(record);
        drop(queue);
        self.notify.notify_one();
    }

    async fn recv(&self) -> Option<ChangeRecord> {
        loop {
            {
                let mut queue = self.state.lock();
                if let Some(record) = queue.pop_front() {
                    drop(queue);
                    self.space_available.notify_one();
                    return Some(record);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.space_available.notify_all();
    }
}

struct ChangeStreamInner {
    observers: Mutex<Vec<Observer>>,
    queues: DashMap<u64, Arc<BoundedQueue>>,
    next_id: AtomicU64,
}

/// The publish/subscribe hub owned by a [`crate::context::Context`].
pub struct ChangeStream {
    inner: Arc<ChangeStreamInner>,
}

impl ChangeStream {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ChangeStreamInner {
                observers: Mutex::new(Vec::new()),
                queues: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a push observer. Called for every [`ChangeRecord`]
    /// published from this point on, synchronously and in registration
    /// order, until the process ends — there's no unsubscribe for push
    /// observers, matching the "non-dropping" guarantee: removing one could
    /// let another believe it's still seeing every change when it isn't.
    pub fn observe(&self, observer: Observer) {
        self.inner.observers.lock().push(observer);
    }

    /// Opens a bounded pull subscription. Dropping the returned
    /// [`QueueSubscription`] cancels it and releases its queue.
    pub fn subscribe(&self, capacity: usize) -> QueueSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(BoundedQueue::new(capacity));
        self.inner.queues.insert(id, queue.clone());
        QueueSubscription {
            id,
            stream: self.inner.clone(),
            queue,
        }
    }

    pub fn publish(&self, record: ChangeRecord) {
        for observer in self.inner.observers.lock().iter() {
            observer(&record);
        }
        // Collect the live queues before pushing: `push` can block on a full
        // queue, and holding a `DashMap` shard guard across that wait would
        // deadlock against a concurrent `QueueSubscription` drop trying to
        // remove from the same shard.
        let queues: Vec<Arc<BoundedQueue>> = self.inner.queues.iter().map(|entry| entry.value().clone()).collect();
        for queue in queues {
            queue.push(record.clone());
        }
    }
}

impl Default for ChangeStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChangeStreamInner {
    fn drop(&mut self) {
        for queue in self.queues.iter() {
            queue.close();
        }
    }
}

/// A cancellable, bounded pull subscription returned by
/// [`ChangeStream::subscribe`].
pub struct QueueSubscription {
    id: u64,
    stream: Arc<ChangeStreamInner>,
    queue: Arc<BoundedQueue>,
}

impl QueueSubscription {
    pub async fn recv(&self) -> Option<ChangeRecord> {
        self.queue.recv().await
    }

    /// Explicit cancellation; equivalent to dropping the subscription.
    pub fn cancel(self) {}
}

impl Drop for QueueSubscription {
    fn drop(&mut self) {
        self.stream.queues.remove(&self.id);
        self.queue.close();
    }
}
