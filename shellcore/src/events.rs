//! A small synchronous pub/sub primitive shared by every store, the
//! signaling client, and the transport manager (spec 9: "the five stores
//! have uniform shape `{ state, mutators, subscribe }`... a common
//! subscription trait").
//!
//! Dispatch is synchronous and in emission order (spec 5): `emit` runs each
//! handler to completion before moving to the next. A handler that panics
//! is caught and logged rather than aborting the remaining handlers or the
//! caller (spec 7, `SubscriberError`).

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    handler: Handler<E>,
}

/// An ordered, mutation-safe list of event subscribers for one event type.
///
/// Construct behind an `Arc` (stores hold `Arc<EventBus<E>>`) so that
/// [`SubscriptionHandle`] can outlive a borrow of the bus and unsubscribe
/// on demand.
pub struct EventBus<E> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers `handler` and returns a token that unsubscribes it.
    pub fn subscribe(
        self: &Arc<Self>,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> SubscriptionHandle<E> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        SubscriptionHandle {
            id,
            bus: Arc::clone(self),
        }
    }

    /// Dispatches `event` to every current subscriber, in subscription
    /// order. A subscriber's list snapshot is cloned under the lock so a
    /// handler is free to subscribe or unsubscribe from within itself.
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let message = panic_message(&panic);
                tracing::error!(message, "event subscriber panicked; continuing dispatch");
            }
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// A live registration on an [`EventBus`]. Dropping this handle does not
/// unsubscribe — callers that want the subscription to end must call
/// [`SubscriptionHandle::unsubscribe`] explicitly, mirroring the spec's
/// `subscribe(handler) -> unsubscribe` contract (a value you can call, not
/// an implicit scope guard).
pub struct SubscriptionHandle<E> {
    id: u64,
    bus: Arc<EventBus<E>>,
}

impl<E> SubscriptionHandle<E> {
    pub fn unsubscribe(self) {
        self.bus.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_to_all_subscribers_in_order() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s1 = Arc::clone(&seen);
        let s2 = Arc::clone(&seen);
        bus.subscribe(move |e| s1.lock().push(("a", *e)));
        bus.subscribe(move |e| s2.lock().push(("b", *e)));
        bus.emit(&1);
        assert_eq!(*seen.lock(), vec![("a", 1), ("b", 1)]);
    }

    #[test]
    fn unsubscribe_stops_future_dispatch() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(&1);
        handle.unsubscribe();
        bus.emit(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_subscriber_does_not_stop_the_others() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe(|_| panic!("boom"));
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
