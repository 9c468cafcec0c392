//! Typisierter Event-Emitter
//!
//! Jede Registrierung bekommt ein eigenes [`Subscription`]-Token, über das
//! genau dieser Handler wieder entfernt wird. Handler werden außerhalb des
//! internen Locks aufgerufen, dürfen sich also selbst abmelden oder wieder
//! in den Aufrufer hineinrufen.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    handlers: Mutex<BTreeMap<u64, Handler<E>>>,
}

/// Event-Emitter für Events vom Typ `E`
pub struct Emitter<E> {
    registry: Arc<Registry<E>>,
}

impl<E: 'static> Emitter<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Registriert einen Handler
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.lock().insert(id, Arc::new(handler));

        let weak: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription {
            id,
            remove: Box::new(move |id| {
                if let Some(registry) = weak.upgrade() {
                    registry.handlers.lock().remove(&id);
                }
            }),
        }
    }

    /// Ruft alle Handler in Registrierungsreihenfolge auf
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self.registry.handlers.lock().values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.handlers.lock().len()
    }
}

impl<E: 'static> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Abmelde-Token einer Registrierung
///
/// Gehört dem Aufrufer; Droppen ohne `unsubscribe` lässt den Handler aktiv.
pub struct Subscription {
    id: u64,
    remove: Box<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        (self.remove)(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
