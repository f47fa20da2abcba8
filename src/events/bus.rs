//! In-process event fan-out.
//!
//! Every subscriber owns a bounded ring of `Arc<DomainEvent>`. Publishing pushes into
//! each ring under that ring's own short lock; a full ring evicts its oldest unread
//! entry, so a stalled consumer loses history instead of slowing the publisher or
//! anyone else. The bus only keeps `Weak` references: dropping a [`Subscription`]
//! is enough to unsubscribe.

use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Notify;

use super::DomainEvent;
use crate::metrics;

pub type SubscriberId = u64;

#[derive(Debug)]
struct SubscriberQueue {
    items: Mutex<VecDeque<Arc<DomainEvent>>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true when an older entry had to be evicted.
    fn push(&self, ev: Arc<DomainEvent>) -> bool {
        let evicted = {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            let evicted = if items.len() >= self.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(ev);
            evicted
        };
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    fn pop(&self) -> Option<Arc<DomainEvent>> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[derive(Debug, Default)]
struct BusInner {
    subscribers: Mutex<Vec<(SubscriberId, Weak<SubscriberQueue>)>>,
    next_id: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl BusInner {
    /// Drop `id` from the fan-out list and end its queue so a pending `recv` wakes.
    fn remove(&self, id: SubscriberId) -> bool {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = subs.iter().position(|(sid, _)| *sid == id) else {
            return false;
        };
        let (_, weak) = subs.remove(pos);
        if let Some(queue) = weak.upgrade() {
            queue.close();
        }
        true
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub subscribers: usize,
    pub dropped: u64,
}

/// Cloneable publish/subscribe handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
    default_depth: usize,
}

impl EventBus {
    /// `default_depth` is the per-subscriber queue size used by [`EventBus::subscribe`].
    pub fn new(default_depth: usize) -> Self {
        Self {
            inner: Arc::new(BusInner::default()),
            default_depth: default_depth.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_depth(self.default_depth)
    }

    pub fn subscribe_with_depth(&self, depth: usize) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let queue = Arc::new(SubscriberQueue::new(depth.max(1)));
        {
            // `close` flips the flag under this lock, so a queue is either seen by
            // its walk or closed here.
            let mut subs = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.closed.load(Ordering::Acquire) {
                queue.close();
            }
            subs.push((id, Arc::downgrade(&queue)));
        }
        debug!("bus: subscriber {} registered (depth={})", id, depth.max(1));
        Subscription {
            id,
            queue,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!("bus: subscriber {} removed", id);
        }
        removed
    }

    /// Deliver `event` to every live subscriber without blocking. Returns the number
    /// of subscribers that received it.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let event = Arc::new(event);
        let targets: Vec<(SubscriberId, Arc<SubscriberQueue>)> = {
            let mut subs = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subs.retain(|(_, weak)| weak.strong_count() > 0);
            subs.iter()
                .filter_map(|(id, weak)| weak.upgrade().map(|q| (*id, q)))
                .collect()
        };
        for (id, queue) in &targets {
            if queue.push(Arc::clone(&event)) {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::inc_subscriber_drops();
                trace!("bus: subscriber {} full, dropped oldest", id);
            }
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        metrics::inc_events_published();
        targets.len()
    }

    /// Wake every subscriber; once drained their `recv` returns `None`.
    pub fn close(&self) {
        let subs = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.closed.store(true, Ordering::Release);
        for (_, weak) in subs.iter() {
            if let Some(q) = weak.upgrade() {
                q.close();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .count()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Consumer end of one bus queue. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    queue: Arc<SubscriberQueue>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Events evicted from this queue because it was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn try_recv(&self) -> Option<Arc<DomainEvent>> {
        self.queue.pop()
    }

    /// Wait for the next event. Returns `None` once the bus is closed and drained.
    pub async fn recv(&self) -> Option<Arc<DomainEvent>> {
        loop {
            if let Some(ev) = self.queue.pop() {
                return Some(ev);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            // Single consumer: a notify_one issued between the pop and this await
            // leaves a permit, so no wake-up is lost.
            self.queue.notify.notified().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
