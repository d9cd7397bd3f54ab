//! One update cycle.
//!
//! [`CacheUpdate`] runs in a read transaction on the update thread: it
//! recomputes the item set of every slice and loads the values the new sets
//! need. The result is a [`DataChange`], applied on the image's gate under
//! the image write lock.

use crate::error::{CacheError, CacheResult};
use crate::event::ImageSliceEvent;
use crate::image::{ImageData, ImageInner};
use crate::loader::{LoadContext, LoaderKey};
use crate::slice::{SliceCore, SliceSource, SliceState};
use itemsync_store::{values_equal, Icn, ItemId, Reader, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A cached value: one loader applied to one item.
pub(crate) type ValueKey = (ItemId, LoaderKey);

/// Values that depend on items other than their own.
#[derive(Debug, Default)]
pub(crate) struct Dependencies {
    dependents: BTreeMap<ItemId, BTreeSet<ValueKey>>,
    of_value: BTreeMap<ValueKey, BTreeSet<ItemId>>,
}

impl Dependencies {
    /// Replaces the dependencies of `key`.
    pub(crate) fn set(&mut self, key: ValueKey, dependencies: BTreeSet<ItemId>) {
        self.remove(key);
        if dependencies.is_empty() {
            return;
        }
        for dependency in &dependencies {
            self.dependents.entry(*dependency).or_default().insert(key);
        }
        self.of_value.insert(key, dependencies);
    }

    pub(crate) fn remove(&mut self, key: ValueKey) {
        let Some(old) = self.of_value.remove(&key) else {
            return;
        };
        for dependency in old {
            if let Some(dependents) = self.dependents.get_mut(&dependency) {
                dependents.remove(&key);
                if dependents.is_empty() {
                    self.dependents.remove(&dependency);
                }
            }
        }
    }

    /// Drops the dependencies of every value of an evicted item.
    pub(crate) fn remove_item(&mut self, item: ItemId) {
        let keys: Vec<ValueKey> = self
            .of_value
            .range((item, LoaderKey(0))..=(item, LoaderKey(usize::MAX)))
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.remove(key);
        }
    }

    /// Values to reload because one of `changed` changed.
    pub(crate) fn dependents_of(&self, changed: &BTreeSet<ItemId>) -> BTreeSet<ValueKey> {
        changed
            .iter()
            .filter_map(|item| self.dependents.get(item))
            .flatten()
            .copied()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.of_value.len()
    }
}

/// Item set a slice gets from one cycle.
pub(crate) struct SliceTarget {
    pub(crate) core: Arc<SliceCore>,
    /// Set computed for manual slices before the cycle, from their pending
    /// changes.
    pub(crate) manual: Option<BTreeSet<ItemId>>,
    /// Whether the slice was disposed when the cycle started.
    pub(crate) coma: bool,
}

impl SliceTarget {
    pub(crate) fn new(core: Arc<SliceCore>) -> Self {
        let coma = core.state() == SliceState::Coma;
        let manual = if coma { None } else { core.take_manual_items() };
        Self { core, manual, coma }
    }
}

/// Computes a [`DataChange`] inside a read transaction.
pub(crate) struct CacheUpdate<'a> {
    image: &'a ImageInner,
    reader: &'a dyn Reader,
    dirty: &'a BTreeSet<ItemId>,
}

impl<'a> CacheUpdate<'a> {
    pub(crate) fn new(
        image: &'a ImageInner,
        reader: &'a dyn Reader,
        dirty: &'a BTreeSet<ItemId>,
    ) -> Self {
        Self {
            image,
            reader,
            dirty,
        }
    }

    /// Recomputes every slice and loads what the new item sets need.
    pub(crate) fn perform(&self, targets: &[SliceTarget]) -> CacheResult<DataChange> {
        let icn = self.reader.icn();
        let sets: Vec<(&SliceTarget, BTreeSet<ItemId>)> = targets
            .iter()
            .map(|target| (target, self.item_set(target)))
            .collect();
        let live: BTreeSet<ItemId> = sets
            .iter()
            .filter(|(target, _)| !target.coma)
            .flat_map(|(_, items)| items.iter().copied())
            .collect();

        let reload = self.image.tracking.lock().dependencies.dependents_of(self.dirty);
        let data = self.image.data.read();
        let mut needed: BTreeMap<LoaderKey, BTreeSet<ItemId>> = BTreeMap::new();
        for (target, items) in &sets {
            for item in items {
                for loader in &target.core.loaders {
                    let key = (*item, *loader);
                    if !data.values.contains_key(&key)
                        || self.dirty.contains(item)
                        || reload.contains(&key)
                    {
                        needed.entry(*loader).or_default().insert(*item);
                    }
                }
            }
        }

        let mut values: BTreeMap<ValueKey, Option<Value>> = BTreeMap::new();
        let mut dependencies: BTreeMap<ValueKey, BTreeSet<ItemId>> = BTreeMap::new();
        for (key, items) in needed {
            let items: Vec<ItemId> = items.into_iter().collect();
            let Some(loader) = self.image.loader(key) else {
                warn!(loader = %key, "unknown loader, values skipped");
                continue;
            };
            let mut context = LoadContext::new();
            let loaded = loader.load(self.reader, &items, &mut context);
            if loaded.len() != items.len() {
                return Err(CacheError::LoaderMismatch {
                    loader: loader.name().to_string(),
                    expected: items.len(),
                    actual: loaded.len(),
                });
            }
            let mut found = context.into_dependencies();
            for (item, value) in items.into_iter().zip(loaded) {
                values.insert((item, key), value);
                dependencies.insert((item, key), found.remove(&item).unwrap_or_default());
            }
            trace!(loader = %key, "values loaded");
        }

        let slices = sets
            .into_iter()
            .map(|(target, items)| {
                let event = slice_event(icn, &target.core, &items, &values, &data);
                SliceChange {
                    core: Arc::clone(&target.core),
                    items,
                    event,
                    coma: target.coma,
                }
            })
            .collect();
        Ok(DataChange {
            icn,
            values,
            dependencies,
            live,
            slices,
        })
    }

    fn item_set(&self, target: &SliceTarget) -> BTreeSet<ItemId> {
        if target.coma {
            return BTreeSet::new();
        }
        if let Some(items) = &target.manual {
            return items.clone();
        }
        match &target.core.source {
            SliceSource::Query(query) => self.reader.query(query).into_iter().collect(),
            SliceSource::Manual(_) => target.core.items.read().clone(),
        }
    }
}

fn slice_event(
    icn: Icn,
    core: &SliceCore,
    items: &BTreeSet<ItemId>,
    values: &BTreeMap<ValueKey, Option<Value>>,
    data: &ImageData,
) -> Option<ImageSliceEvent> {
    let current = core.items.read();
    let added: Vec<ItemId> = items.difference(&current).copied().collect();
    let removed: Vec<ItemId> = current.difference(items).copied().collect();
    let mut changed: BTreeMap<ItemId, BTreeSet<LoaderKey>> = BTreeMap::new();
    for item in items.intersection(&current) {
        for loader in &core.loaders {
            let key = (*item, *loader);
            let Some(new) = values.get(&key) else {
                continue;
            };
            let old = data.values.get(&key).and_then(Option::as_ref);
            if !values_equal(new.as_ref(), old) {
                changed.entry(*item).or_default().insert(*loader);
            }
        }
    }
    let event = ImageSliceEvent::new(icn, added, removed, changed);
    (!event.is_empty()).then_some(event)
}

struct SliceChange {
    core: Arc<SliceCore>,
    items: BTreeSet<ItemId>,
    event: Option<ImageSliceEvent>,
    /// The items are the empty set of a disposed slice.
    coma: bool,
}

impl SliceChange {
    /// Whether the computed set is stale: the slice was disposed after the
    /// cycle started. The next cycle computes its removal.
    fn is_stale(&self, state: SliceState) -> bool {
        state == SliceState::Coma && !self.coma
    }
}

/// Result of one cycle, applied on the gate.
pub(crate) struct DataChange {
    icn: Icn,
    values: BTreeMap<ValueKey, Option<Value>>,
    dependencies: BTreeMap<ValueKey, BTreeSet<ItemId>>,
    live: BTreeSet<ItemId>,
    slices: Vec<SliceChange>,
}

impl DataChange {
    /// Applies the change and fires slice events. Returns the number of
    /// events fired.
    pub(crate) fn apply(self, image: &ImageInner) -> usize {
        if image.is_stopped() {
            return 0;
        }
        let states: Vec<SliceState> = self.slices.iter().map(|slice| slice.core.state()).collect();
        let evicted: BTreeSet<ItemId> = {
            let mut data = image.data.write();
            data.icn = data.icn.max(self.icn);
            let loaded = self.values.len();
            data.values.extend(self.values);
            let live = &self.live;
            let evicted: BTreeSet<ItemId> = data
                .values
                .keys()
                .filter(|(item, _)| !live.contains(item))
                .map(|(item, _)| *item)
                .collect();
            data.values.retain(|(item, _), _| live.contains(item));
            for (slice, state) in self.slices.iter().zip(&states) {
                if !slice.is_stale(*state) {
                    *slice.core.items.write() = slice.items.clone();
                }
            }
            debug!(icn = %self.icn, loaded, evicted = evicted.len(), "cache update applied");
            evicted
        };
        {
            let mut tracking = image.tracking.lock();
            for (key, dependencies) in self.dependencies {
                tracking.dependencies.set(key, dependencies);
            }
            for item in evicted {
                tracking.dependencies.remove_item(item);
            }
        }

        let mut fired = 0;
        for (slice, state) in self.slices.into_iter().zip(states) {
            match state {
                SliceState::Coma if slice.is_stale(state) => {
                    trace!(slice = ?slice.core.id, "disposed during the cycle");
                }
                SliceState::Coma => {
                    if let Some(event) = &slice.event {
                        slice.core.fire(event);
                        fired += 1;
                    }
                    image.forget_slice(slice.core.id);
                    debug!(slice = ?slice.core.id, "slice buried");
                }
                SliceState::Buried => {}
                SliceState::Initial | SliceState::Running => {
                    slice.core.transition(SliceState::Initial, SliceState::Running);
                    if let Some(event) = &slice.event {
                        slice.core.fire(event);
                        fired += 1;
                    }
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ItemId {
        ItemId::new(raw)
    }

    #[test]
    fn dependencies_are_replaced() {
        let mut deps = Dependencies::default();
        let key = (id(1), LoaderKey(0));
        deps.set(key, BTreeSet::from([id(10)]));
        assert_eq!(deps.dependents_of(&BTreeSet::from([id(10)])), BTreeSet::from([key]));

        deps.set(key, BTreeSet::from([id(11)]));
        assert!(deps.dependents_of(&BTreeSet::from([id(10)])).is_empty());
        assert_eq!(deps.dependents_of(&BTreeSet::from([id(11)])), BTreeSet::from([key]));
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn evicted_item_drops_all_its_dependencies() {
        let mut deps = Dependencies::default();
        deps.set((id(1), LoaderKey(0)), BTreeSet::from([id(10)]));
        deps.set((id(1), LoaderKey(3)), BTreeSet::from([id(10), id(12)]));
        deps.set((id(2), LoaderKey(0)), BTreeSet::from([id(10)]));
        deps.remove_item(id(1));
        assert_eq!(deps.len(), 1);
        assert_eq!(
            deps.dependents_of(&BTreeSet::from([id(10), id(12)])),
            BTreeSet::from([(id(2), LoaderKey(0))])
        );
    }

    #[test]
    fn empty_dependencies_are_not_kept() {
        let mut deps = Dependencies::default();
        deps.set((id(1), LoaderKey(0)), BTreeSet::new());
        assert_eq!(deps.len(), 0);
    }
}
