//! Configurable merge logic.

use itemsync_core::{AutoMergeData, ItemAutoMerge, MergeSelector};
use itemsync_store::{ItemId, Reader};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Merge logic from a closure.
pub struct FnMerge<F>(pub F);

impl<F> ItemAutoMerge for FnMerge<F>
where
    F: Fn(&mut AutoMergeData) + Send + Sync,
{
    fn resolve(&self, data: &mut AutoMergeData) {
        (self.0)(data);
    }
}

/// Merge selector with per-item logic and an optional fallback.
#[derive(Default)]
pub struct TestMergeSelector {
    items: RwLock<BTreeMap<ItemId, Arc<dyn ItemAutoMerge>>>,
    fallback: RwLock<Option<Arc<dyn ItemAutoMerge>>>,
    lookups: AtomicUsize,
}

impl TestMergeSelector {
    /// A selector resolving nothing until configured.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Uses `merge` for `item`.
    pub fn set(&self, item: ItemId, merge: Arc<dyn ItemAutoMerge>) {
        self.items.write().insert(item, merge);
    }

    /// Uses `merge` for items without their own logic.
    pub fn set_fallback(&self, merge: Arc<dyn ItemAutoMerge>) {
        *self.fallback.write() = Some(merge);
    }

    /// Number of times merge logic was looked up.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl MergeSelector for TestMergeSelector {
    fn operations(&self, _reader: &dyn Reader, item: ItemId) -> Option<Arc<dyn ItemAutoMerge>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.items
            .read()
            .get(&item)
            .cloned()
            .or_else(|| self.fallback.read().clone())
    }
}
