//! Change signals without payload.

use crate::gate::Gate;
use crate::lifespan::Lifespan;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Gate, Listener)>>,
}

/// Something that changes and tells listeners it did.
///
/// Used for lock-table changes: action enablement re-reads state when
/// notified, so no payload is carried.
#[derive(Clone, Default)]
pub struct Modifiable {
    inner: Arc<Inner>,
}

impl Modifiable {
    /// Creates a modifiable with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener for the duration of `life`, called on `gate`.
    pub fn add_listener(
        &self,
        life: &Lifespan,
        gate: Gate,
        listener: impl Fn() + Send + Sync + 'static,
    ) {
        if life.is_ended() {
            return;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .write()
            .push((id, gate, Arc::new(listener)));
        let inner = Arc::downgrade(&self.inner);
        life.add(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.write().retain(|(other, _, _)| *other != id);
            }
        });
    }

    /// Notifies every listener.
    pub fn fire_changed(&self) {
        let listeners: Vec<(Gate, Listener)> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, gate, listener)| (gate.clone(), Arc::clone(listener)))
            .collect();
        for (gate, listener) in listeners {
            gate.execute(move || listener());
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}
