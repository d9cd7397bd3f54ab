//! Image slices: item sets the image keeps current.
//!
//! A slice lives through `Initial -> Running -> Coma -> Buried`. It is
//! `Initial` until its first update cycle was applied. Disposing it puts it
//! in `Coma`: no new work starts for it, and the next update cycle computes
//! its final event, with every item removed, before it is `Buried`.

use crate::event::ImageSliceEvent;
use crate::image::ImageInner;
use crate::loader::LoaderKey;
use itemsync_store::{ItemId, Lifespan, Query, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Identifier of a slice within its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceId(pub(crate) u64);

/// Lifecycle state of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceState {
    /// Created, not computed yet.
    Initial,
    /// Kept current by update cycles.
    Running,
    /// Disposed, final event pending.
    Coma,
    /// Gone.
    Buried,
}

impl SliceState {
    const fn to_u8(self) -> u8 {
        match self {
            SliceState::Initial => 0,
            SliceState::Running => 1,
            SliceState::Coma => 2,
            SliceState::Buried => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => SliceState::Initial,
            1 => SliceState::Running,
            2 => SliceState::Coma,
            _ => SliceState::Buried,
        }
    }
}

/// Receives slice events.
pub trait SliceListener: Send + Sync {
    /// Called on the image's gate after an update cycle changed the slice.
    fn on_slice_changed(&self, event: &ImageSliceEvent);
}

impl<F> SliceListener for F
where
    F: Fn(&ImageSliceEvent) + Send + Sync,
{
    fn on_slice_changed(&self, event: &ImageSliceEvent) {
        self(event);
    }
}

/// Additions and removals of a manual slice not applied yet.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    pub(crate) add: BTreeSet<ItemId>,
    pub(crate) remove: BTreeSet<ItemId>,
}

pub(crate) enum SliceSource {
    Manual(Mutex<Pending>),
    Query(Query),
}

pub(crate) struct SliceCore {
    pub(crate) id: SliceId,
    pub(crate) source: SliceSource,
    pub(crate) loaders: Vec<LoaderKey>,
    state: AtomicU8,
    /// Applied item set.
    pub(crate) items: RwLock<BTreeSet<ItemId>>,
    listeners: RwLock<Vec<(u64, Arc<dyn SliceListener>)>>,
    next_listener: AtomicU64,
}

impl SliceCore {
    pub(crate) fn new(id: SliceId, source: SliceSource, loaders: Vec<LoaderKey>) -> Self {
        Self {
            id,
            source,
            loaders,
            state: AtomicU8::new(SliceState::Initial.to_u8()),
            items: RwLock::new(BTreeSet::new()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> SliceState {
        SliceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves `from` to `to`. Returns false if the slice was not in `from`.
    pub(crate) fn transition(&self, from: SliceState, to: SliceState) -> bool {
        self.state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn bury(&self) {
        self.state.store(SliceState::Buried.to_u8(), Ordering::SeqCst);
        self.listeners.write().clear();
        self.items.write().clear();
    }

    /// Item set the next cycle computes from the applied one, for manual
    /// slices. Takes the pending changes.
    pub(crate) fn take_manual_items(&self) -> Option<BTreeSet<ItemId>> {
        let SliceSource::Manual(pending) = &self.source else {
            return None;
        };
        let pending = std::mem::take(&mut *pending.lock());
        let mut items = self.items.read().clone();
        items.extend(pending.add);
        for item in &pending.remove {
            items.remove(item);
        }
        Some(items)
    }

    /// Puts changes taken by a failed cycle back, unless newer ones
    /// override them.
    pub(crate) fn restore_pending(&self, items: &BTreeSet<ItemId>) {
        let SliceSource::Manual(pending) = &self.source else {
            return;
        };
        let applied = self.items.read().clone();
        let mut pending = pending.lock();
        for item in items.difference(&applied) {
            if !pending.remove.contains(item) {
                pending.add.insert(*item);
            }
        }
        for item in applied.difference(items) {
            if !pending.add.contains(item) {
                pending.remove.insert(*item);
            }
        }
    }

    pub(crate) fn fire(&self, event: &ImageSliceEvent) {
        let listeners: Vec<Arc<dyn SliceListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_slice_changed(event);
        }
    }
}

impl fmt::Debug for SliceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceCore")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("items", &self.items.read().len())
            .finish()
    }
}

/// Handle to a slice of a [`crate::DbImage`].
#[derive(Clone)]
pub struct ImageSlice {
    pub(crate) core: Arc<SliceCore>,
    pub(crate) image: Weak<ImageInner>,
}

impl ImageSlice {
    /// Slice identifier.
    pub fn id(&self) -> SliceId {
        self.core.id
    }

    /// Lifecycle state.
    pub fn state(&self) -> SliceState {
        self.core.state()
    }

    /// Items as of the last applied update cycle.
    pub fn items(&self) -> Vec<ItemId> {
        self.core.items.read().iter().copied().collect()
    }

    /// Returns true if `item` was in the slice after the last cycle.
    pub fn contains(&self, item: ItemId) -> bool {
        self.core.items.read().contains(&item)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.core.items.read().len()
    }

    /// Returns true if the slice has no items.
    pub fn is_empty(&self) -> bool {
        self.core.items.read().is_empty()
    }

    /// Loaders whose values the slice keeps.
    pub fn loaders(&self) -> &[LoaderKey] {
        &self.core.loaders
    }

    /// Cached value of `loader` for `item`, if `item` is in the slice.
    pub fn get_value(&self, item: ItemId, loader: LoaderKey) -> Option<Value> {
        if !self.contains(item) {
            return None;
        }
        self.image.upgrade()?.get_value(item, loader)
    }

    /// Adds a listener for the duration of `life`.
    pub fn add_listener(&self, life: &Lifespan, listener: Arc<dyn SliceListener>) {
        if life.is_ended() || self.state() == SliceState::Buried {
            return;
        }
        let id = self.core.next_listener.fetch_add(1, Ordering::SeqCst);
        self.core.listeners.write().push((id, listener));
        let core = Arc::downgrade(&self.core);
        life.add(move || {
            if let Some(core) = core.upgrade() {
                core.listeners.write().retain(|(other, _)| *other != id);
            }
        });
    }

    /// Disposes the slice. Listeners get a last event removing every item
    /// unless the image is stopped.
    pub fn dispose(&self) {
        let disposed = self.core.transition(SliceState::Running, SliceState::Coma)
            || self.core.transition(SliceState::Initial, SliceState::Coma);
        if !disposed {
            return;
        }
        debug!(slice = ?self.core.id, "slice disposed");
        match self.image.upgrade() {
            Some(image) if image.is_running() => image.request_update(),
            Some(image) => image.forget_slice(self.core.id),
            None => self.core.bury(),
        }
    }
}

impl fmt::Debug for ImageSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt(f)
    }
}

/// Slice whose items are added and removed explicitly.
#[derive(Clone, Debug)]
pub struct ManualImageSlice {
    pub(crate) slice: ImageSlice,
}

impl ManualImageSlice {
    /// Adds items; they appear after the next update cycle.
    pub fn add_items(&self, items: &[ItemId]) {
        self.change(|pending| {
            for item in items {
                pending.remove.remove(item);
                pending.add.insert(*item);
            }
        });
    }

    /// Removes items; they disappear after the next update cycle. A removal
    /// cancels a pending addition of the same item.
    pub fn remove_items(&self, items: &[ItemId]) {
        self.change(|pending| {
            for item in items {
                pending.add.remove(item);
                pending.remove.insert(*item);
            }
        });
    }

    /// Replaces the item set.
    pub fn set_items(&self, items: &[ItemId]) {
        let wanted: BTreeSet<ItemId> = items.iter().copied().collect();
        let current = self.slice.core.items.read().clone();
        self.change(|pending| {
            pending.add = wanted.difference(&current).copied().collect();
            pending.remove = current.difference(&wanted).copied().collect();
        });
    }

    /// The underlying slice.
    pub fn slice(&self) -> &ImageSlice {
        &self.slice
    }

    fn change(&self, edit: impl FnOnce(&mut Pending)) {
        if matches!(self.state(), SliceState::Coma | SliceState::Buried) {
            return;
        }
        if let SliceSource::Manual(pending) = &self.slice.core.source {
            edit(&mut pending.lock());
        }
        if let Some(image) = self.slice.image.upgrade() {
            image.request_update();
        }
    }
}

impl Deref for ManualImageSlice {
    type Target = ImageSlice;

    fn deref(&self) -> &ImageSlice {
        &self.slice
    }
}

/// Slice holding the items matching a query.
#[derive(Clone, Debug)]
pub struct QueryImageSlice {
    pub(crate) slice: ImageSlice,
}

impl QueryImageSlice {
    /// The query the slice follows.
    pub fn query(&self) -> Option<&Query> {
        match &self.slice.core.source {
            SliceSource::Query(query) => Some(query),
            SliceSource::Manual(_) => None,
        }
    }

    /// The underlying slice.
    pub fn slice(&self) -> &ImageSlice {
        &self.slice
    }
}

impl Deref for QueryImageSlice {
    type Target = ImageSlice;

    fn deref(&self) -> &ImageSlice {
        &self.slice
    }
}
