//! Commit notifications.
//!
//! Listeners are called on the writer thread right after a commit became
//! visible, before the next write transaction starts, so they observe
//! commits in ICN order. Subscribers get the same events over a channel.

use crate::transaction::Reader;
use crate::types::{Icn, ItemId};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// A committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbEvent {
    /// ICN of the commit.
    pub icn: Icn,
    /// Items whose values changed.
    pub changed: BTreeSet<ItemId>,
}

/// Receives commit notifications.
pub trait DbListener: Send + Sync {
    /// Called after a commit. `reader` reads the committed state.
    fn on_database_changed(&self, event: &DbEvent, reader: &dyn Reader);
}

impl<F> DbListener for F
where
    F: Fn(&DbEvent, &dyn Reader) + Send + Sync,
{
    fn on_database_changed(&self, event: &DbEvent, reader: &dyn Reader) {
        self(event, reader);
    }
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Arc<dyn DbListener>)>>,
    subscribers: RwLock<Vec<Sender<DbEvent>>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: Arc<dyn DbListener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.listeners.write().retain(|(other, _)| *other != id);
    }

    pub(crate) fn subscribe(&self) -> Receiver<DbEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    pub(crate) fn dispatch(&self, event: &DbEvent, reader: &dyn Reader) {
        let listeners: Vec<Arc<dyn DbListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_database_changed(event, reader);
        }
        // Disconnected subscribers are pruned on the way.
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }
}
