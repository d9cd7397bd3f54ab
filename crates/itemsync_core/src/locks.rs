//! The per-item lock tables.
//!
//! Edit locks belong to an edit session and live until it is released.
//! Short locks are taken by merging transactions for their own duration;
//! an edit start that reads bases of a short-locked item waits for it.
//! Upload locks mark items between upload prepare and write-back.

use crate::edit::EditCounterpart;
use itemsync_store::ItemId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Work postponed until short locks clear.
pub(crate) type DeferredStart = Box<dyn FnOnce() + Send>;

/// Cleanup rounds for dead holders before a lock request gives up.
const DEAD_HOLDER_ROUNDS: usize = 3;

/// Outcome of a short-lock request.
pub(crate) enum ShortLock {
    Acquired,
    Held(Arc<EditCounterpart>),
}

#[derive(Default)]
struct LockTable {
    holders: HashMap<ItemId, Arc<EditCounterpart>>,
    short: HashSet<ItemId>,
    deferred: Vec<DeferredStart>,
}

impl LockTable {
    /// Distinct holders of `items` other than `owner`.
    fn others(&self, items: &[ItemId], owner: &Arc<EditCounterpart>) -> Vec<Arc<EditCounterpart>> {
        let mut found: Vec<Arc<EditCounterpart>> = Vec::new();
        for holder in items.iter().filter_map(|item| self.holders.get(item)) {
            if !Arc::ptr_eq(holder, owner) && !found.iter().any(|f| Arc::ptr_eq(f, holder)) {
                found.push(Arc::clone(holder));
            }
        }
        found
    }
}

/// Edit and short locks.
#[derive(Default)]
pub(crate) struct EditLocks {
    table: Mutex<LockTable>,
}

impl EditLocks {
    /// Locks every item for `owner` or none of them.
    ///
    /// Holders whose editor is gone are released and the request retried.
    pub(crate) fn try_lock_all(&self, items: &[ItemId], owner: &Arc<EditCounterpart>) -> bool {
        for _ in 0..DEAD_HOLDER_ROUNDS {
            let busy = {
                let mut table = self.table.lock();
                let busy = table.others(items, owner);
                if busy.is_empty() {
                    for item in items {
                        table.holders.insert(*item, Arc::clone(owner));
                    }
                    return true;
                }
                busy
            };
            // Editors are polled outside the table lock.
            if busy.iter().any(|holder| holder.is_alive()) {
                return false;
            }
            for holder in busy {
                debug!(items = ?holder.items(), "reclaiming lock of dead editor");
                holder.release_abandoned();
            }
        }
        false
    }

    /// Drops every lock of `owner`.
    pub(crate) fn unlock(&self, owner: &Arc<EditCounterpart>) {
        self.table
            .lock()
            .holders
            .retain(|_, holder| !Arc::ptr_eq(holder, owner));
    }

    pub(crate) fn holder(&self, item: ItemId) -> Option<Arc<EditCounterpart>> {
        self.table.lock().holders.get(&item).cloned()
    }

    pub(crate) fn is_locked(&self, item: ItemId) -> bool {
        self.table.lock().holders.contains_key(&item)
    }

    /// Returns true if `owner` holds every item.
    pub(crate) fn holds_all(&self, items: &[ItemId], owner: &Arc<EditCounterpart>) -> bool {
        let table = self.table.lock();
        items.iter().all(|item| {
            table
                .holders
                .get(item)
                .is_some_and(|holder| Arc::ptr_eq(holder, owner))
        })
    }

    /// Number of locked items.
    pub(crate) fn len(&self) -> usize {
        self.table.lock().holders.len()
    }

    /// Short-locks `item` unless an edit other than `ignore` holds it.
    pub(crate) fn short_lock(&self, item: ItemId, ignore: Option<&Arc<EditCounterpart>>) -> ShortLock {
        let mut table = self.table.lock();
        let held = table
            .holders
            .get(&item)
            .filter(|holder| !ignore.is_some_and(|ignored| Arc::ptr_eq(ignored, holder)))
            .cloned();
        if let Some(holder) = held {
            return ShortLock::Held(holder);
        }
        table.short.insert(item);
        ShortLock::Acquired
    }

    /// Drops short locks and hands back every deferred start.
    pub(crate) fn release_short(&self, items: &[ItemId]) -> Vec<DeferredStart> {
        let mut table = self.table.lock();
        for item in items {
            table.short.remove(item);
        }
        if table.short.is_empty() {
            std::mem::take(&mut table.deferred)
        } else {
            Vec::new()
        }
    }

    /// Queues `start` if any item is short-locked, otherwise hands it back.
    pub(crate) fn defer_if_short_locked(
        &self,
        items: &[ItemId],
        start: DeferredStart,
    ) -> Option<DeferredStart> {
        let mut table = self.table.lock();
        if items.iter().any(|item| table.short.contains(item)) {
            table.deferred.push(start);
            None
        } else {
            Some(start)
        }
    }
}

/// Items between upload prepare and write-back.
#[derive(Default)]
pub(crate) struct UploadLocks {
    items: Mutex<HashSet<ItemId>>,
}

impl UploadLocks {
    pub(crate) fn try_lock(&self, item: ItemId) -> bool {
        self.items.lock().insert(item)
    }

    pub(crate) fn unlock(&self, items: &[ItemId]) {
        let mut locked = self.items.lock();
        for item in items {
            locked.remove(item);
        }
    }

    pub(crate) fn is_locked(&self, item: ItemId) -> bool {
        self.items.lock().contains(&item)
    }
}
