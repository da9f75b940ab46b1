//! Typed observer registry.
//!
//! Components that notify across boundaries (transport changes, timing
//! diagnostics) own an `EventHub` and hand out `SubscriptionId`s. Subscribers
//! unsubscribe with the id they were given, so disposal can tear down every
//! handler it registered and nothing dangles.

use std::sync::{Arc, Mutex};

/// Opaque handle returned by `subscribe`, used to remove exactly that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Box<dyn Fn(&E) + Send>;

struct HubInner<E> {
    handlers: Vec<(SubscriptionId, Handler<E>)>,
    next_id: u64,
}

/// A list of callbacks for one event type.
///
/// `emit` runs handlers while holding the registry lock, so handlers must be
/// short and must not call back into `subscribe`/`unsubscribe` on the same
/// hub. The hub is cloneable; clones share the handler list.
pub struct EventHub<E> {
    inner: Arc<Mutex<HubInner<E>>>,
}

impl<E> Clone for EventHub<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventHub<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                handlers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Register a handler. Returns the id needed to unsubscribe it.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + 'static,
    {
        let mut inner = self.inner.lock().expect("event hub poisoned");
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Unknown ids are a no-op, so double-unsubscribe on
    /// disposal paths is harmless.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("event hub poisoned");
        inner.handlers.retain(|(h, _)| *h != id);
    }

    /// Deliver an event to every current subscriber.
    pub fn emit(&self, event: &E) {
        let inner = self.inner.lock().expect("event hub poisoned");
        for (_, handler) in &inner.handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("event hub poisoned").handlers.len()
    }
}
