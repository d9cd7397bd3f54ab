//! The database image: slices kept current by one update pipeline.
//!
//! ## Image states
//!
//! `Initial -> Startup -> Running -> Stopped`, moved by compare-and-swap.
//! `Startup` is held by the one thread registering the store listener and
//! spawning the update thread; other callers of [`DbImage::start`] wait on
//! a condition variable until it is over.
//!
//! ## Update requests
//!
//! `No -> Waiting -> Running -> No`, or `Running -> Restart -> Waiting`
//! when a request arrives while a cycle runs. Requests during a cycle
//! coalesce into one more cycle.

use crate::config::ImageConfig;
use crate::error::{CacheError, CacheResult};
use crate::loader::{DataLoader, LoaderKey};
use crate::slice::{
    ImageSlice, ManualImageSlice, Pending, QueryImageSlice, SliceCore, SliceId, SliceSource,
    SliceState,
};
use crate::update::{CacheUpdate, DataChange, Dependencies, SliceTarget, ValueKey};
use itemsync_store::{DbEvent, Gate, Icn, ItemId, Lifespan, Query, Reader, Store, Value};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const IMAGE_INITIAL: u8 = 0;
const IMAGE_STARTUP: u8 = 1;
const IMAGE_RUNNING: u8 = 2;
const IMAGE_STOPPED: u8 = 3;

const REQ_NO: u8 = 0;
const REQ_WAITING: u8 = 1;
const REQ_RUNNING: u8 = 2;
const REQ_RESTART: u8 = 3;

/// Applied values and the ICN they were read at.
#[derive(Debug, Default)]
pub(crate) struct ImageData {
    pub(crate) icn: Icn,
    pub(crate) values: BTreeMap<ValueKey, Option<Value>>,
}

/// State only the update pipeline touches.
#[derive(Debug, Default)]
pub(crate) struct Tracking {
    pub(crate) dirty: BTreeSet<ItemId>,
    pub(crate) dependencies: Dependencies,
}

pub(crate) struct ImageInner {
    store: Store,
    gate: Gate,
    config: ImageConfig,
    state: AtomicU8,
    state_lock: Mutex<()>,
    state_changed: Condvar,
    request: AtomicU8,
    wake_lock: Mutex<()>,
    wake: Condvar,
    idle_lock: Mutex<()>,
    idle: Condvar,
    life: Lifespan,
    loaders: RwLock<Vec<Arc<dyn DataLoader>>>,
    slices: RwLock<BTreeMap<SliceId, Arc<SliceCore>>>,
    next_slice: AtomicU64,
    pub(crate) data: RwLock<ImageData>,
    pub(crate) tracking: Mutex<Tracking>,
    cycles: AtomicU64,
}

impl ImageInner {
    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == IMAGE_RUNNING
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) == IMAGE_STOPPED
    }

    fn set_state(&self, state: u8) -> u8 {
        let _guard = self.state_lock.lock();
        let previous = self.state.swap(state, Ordering::SeqCst);
        self.state_changed.notify_all();
        previous
    }

    pub(crate) fn loader(&self, key: LoaderKey) -> Option<Arc<dyn DataLoader>> {
        self.loaders.read().get(key.0).cloned()
    }

    pub(crate) fn get_value(&self, item: ItemId, loader: LoaderKey) -> Option<Value> {
        self.data.read().values.get(&(item, loader)).cloned().flatten()
    }

    /// Asks for an update cycle. Never blocks on a running cycle.
    pub(crate) fn request_update(&self) {
        loop {
            let current = self.request.load(Ordering::SeqCst);
            let next = match current {
                REQ_NO => REQ_WAITING,
                REQ_RUNNING => REQ_RESTART,
                _ => return,
            };
            if self
                .request
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if next == REQ_WAITING {
                    let _guard = self.wake_lock.lock();
                    self.wake.notify_one();
                }
                return;
            }
        }
    }

    fn mark_dirty(&self, items: &BTreeSet<ItemId>) {
        self.tracking.lock().dirty.extend(items.iter().copied());
        self.request_update();
    }

    pub(crate) fn forget_slice(&self, id: SliceId) {
        if let Some(core) = self.slices.write().remove(&id) {
            core.bury();
        }
    }

    fn notify_idle(&self) {
        let _guard = self.idle_lock.lock();
        self.idle.notify_all();
    }

    fn add_slice(self: &Arc<Self>, source: SliceSource, loaders: &[LoaderKey]) -> CacheResult<ImageSlice> {
        if self.is_stopped() {
            return Err(CacheError::Stopped);
        }
        let id = SliceId(self.next_slice.fetch_add(1, Ordering::SeqCst));
        let core = Arc::new(SliceCore::new(id, source, loaders.to_vec()));
        self.slices.write().insert(id, Arc::clone(&core));
        debug!(slice = ?id, loaders = loaders.len(), "slice added");
        self.request_update();
        Ok(ImageSlice {
            core,
            image: Arc::downgrade(self),
        })
    }

    /// Runs update cycles until the image stops.
    fn run_updates(self: Arc<Self>) {
        loop {
            {
                let mut guard = self.wake_lock.lock();
                while self.request.load(Ordering::SeqCst) == REQ_NO && !self.is_stopped() {
                    self.wake.wait(&mut guard);
                }
            }
            if self.is_stopped() {
                self.request.store(REQ_NO, Ordering::SeqCst);
                self.notify_idle();
                debug!("update thread exits");
                return;
            }
            self.request.store(REQ_RUNNING, Ordering::SeqCst);
            self.run_cycle();
            if self
                .request
                .compare_exchange(REQ_RUNNING, REQ_NO, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!("update requested while running, restarting");
                self.request.store(REQ_WAITING, Ordering::SeqCst);
            } else {
                self.notify_idle();
            }
        }
    }

    fn run_cycle(self: &Arc<Self>) {
        let started = Instant::now();
        let dirty = std::mem::take(&mut self.tracking.lock().dirty);
        let cores: Vec<Arc<SliceCore>> = self.slices.read().values().cloned().collect();
        let targets: Vec<SliceTarget> = cores
            .into_iter()
            .filter(|core| core.state() != SliceState::Buried)
            .map(SliceTarget::new)
            .collect();

        let outcome = self
            .store
            .read_now(|reader| Ok(CacheUpdate::new(self, reader, &dirty).perform(&targets)))
            .map_err(CacheError::from)
            .and_then(|performed| performed);
        let change = match outcome {
            Ok(change) => change,
            Err(err) => {
                error!(error = %err, "cache update failed");
                self.tracking.lock().dirty.extend(dirty);
                for target in &targets {
                    if let Some(items) = &target.manual {
                        target.core.restore_pending(items);
                    }
                }
                return;
            }
        };
        self.apply(change);
        self.cycles.fetch_add(1, Ordering::SeqCst);

        let elapsed = started.elapsed();
        if self.config.log_slow_updates && elapsed > self.config.slow_update_threshold {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                slices = targets.len(),
                "slow cache update"
            );
        }
    }

    /// Applies on the gate and waits until it was applied.
    fn apply(self: &Arc<Self>, change: DataChange) {
        let (done, applied) = mpsc::channel();
        let image = Arc::clone(self);
        self.gate.execute(move || {
            let fired = change.apply(&image);
            let _ = done.send(fired);
        });
        match applied.recv() {
            Ok(fired) if fired > 0 => debug!(events = fired, "slice events fired"),
            Ok(_) => {}
            Err(_) => warn!("gate dropped a cache update"),
        }
    }
}

/// A live image of store data.
///
/// Slices define item sets; loaders define the values kept for them. The
/// image follows store commits in the background and delivers one
/// [`crate::ImageSliceEvent`] per changed slice and cycle on its gate.
///
/// The update thread runs until [`DbImage::stop`].
#[derive(Clone)]
pub struct DbImage {
    inner: Arc<ImageInner>,
}

impl DbImage {
    /// Creates an image delivering events on `gate`.
    pub fn new(store: Store, gate: Gate) -> Self {
        Self::with_config(store, gate, ImageConfig::default())
    }

    /// Creates an image with the given configuration.
    pub fn with_config(store: Store, gate: Gate, config: ImageConfig) -> Self {
        Self {
            inner: Arc::new(ImageInner {
                store,
                gate,
                config,
                state: AtomicU8::new(IMAGE_INITIAL),
                state_lock: Mutex::new(()),
                state_changed: Condvar::new(),
                request: AtomicU8::new(REQ_NO),
                wake_lock: Mutex::new(()),
                wake: Condvar::new(),
                idle_lock: Mutex::new(()),
                idle: Condvar::new(),
                life: Lifespan::new(),
                loaders: RwLock::new(Vec::new()),
                slices: RwLock::new(BTreeMap::new()),
                next_slice: AtomicU64::new(1),
                data: RwLock::new(ImageData::default()),
                tracking: Mutex::new(Tracking::default()),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    /// Starts following the store. Starting a running image is a no-op.
    pub fn start(&self) -> CacheResult<()> {
        loop {
            match self.inner.state.compare_exchange(
                IMAGE_INITIAL,
                IMAGE_STARTUP,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(IMAGE_STARTUP) => {
                    let mut guard = self.inner.state_lock.lock();
                    while self.inner.state.load(Ordering::SeqCst) == IMAGE_STARTUP {
                        self.inner.state_changed.wait(&mut guard);
                    }
                }
                Err(IMAGE_RUNNING) => return Ok(()),
                Err(_) => return Err(CacheError::Stopped),
            }
        }

        let image = Arc::downgrade(&self.inner);
        self.inner.store.add_listener(
            &self.inner.life,
            Arc::new(move |event: &DbEvent, _reader: &dyn Reader| {
                if let Some(image) = image.upgrade() {
                    image.mark_dirty(&event.changed);
                }
            }),
        );
        let worker = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(self.inner.config.update_thread_name.clone())
            .spawn(move || worker.run_updates());
        if let Err(err) = spawned {
            error!(error = %err, "cannot spawn image update thread");
            self.inner.life.end();
            self.inner.set_state(IMAGE_STOPPED);
            return Err(CacheError::Thread(err.to_string()));
        }
        {
            let _guard = self.inner.state_lock.lock();
            let started = self.inner.state.compare_exchange(
                IMAGE_STARTUP,
                IMAGE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            self.inner.state_changed.notify_all();
            if started.is_err() {
                return Err(CacheError::Stopped);
            }
        }
        info!(thread = %self.inner.config.update_thread_name, "image started");
        self.inner.request_update();
        Ok(())
    }

    /// Stops the image. Slices are buried without a final event.
    pub fn stop(&self) {
        if self.inner.set_state(IMAGE_STOPPED) == IMAGE_STOPPED {
            return;
        }
        self.inner.life.end();
        {
            let _guard = self.inner.wake_lock.lock();
            self.inner.wake.notify_all();
        }
        let slices = std::mem::take(&mut *self.inner.slices.write());
        for core in slices.into_values() {
            core.bury();
        }
        *self.inner.data.write() = ImageData::default();
        *self.inner.tracking.lock() = Tracking::default();
        self.inner.notify_idle();
        info!("image stopped");
    }

    /// Returns true while the image follows the store.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Registers a loader. Slices refer to it by the returned key.
    pub fn register_loader(&self, loader: Arc<dyn DataLoader>) -> LoaderKey {
        let mut loaders = self.inner.loaders.write();
        loaders.push(loader);
        LoaderKey(loaders.len() - 1)
    }

    /// Adds a slice whose items are set explicitly.
    pub fn manual_slice(&self, loaders: &[LoaderKey]) -> CacheResult<ManualImageSlice> {
        let slice = self
            .inner
            .add_slice(SliceSource::Manual(Mutex::new(Pending::default())), loaders)?;
        Ok(ManualImageSlice { slice })
    }

    /// Adds a slice holding the items that match `query`.
    pub fn query_slice(&self, query: Query, loaders: &[LoaderKey]) -> CacheResult<QueryImageSlice> {
        let slice = self.inner.add_slice(SliceSource::Query(query), loaders)?;
        Ok(QueryImageSlice { slice })
    }

    /// Cached value of `loader` for `item`.
    pub fn get_value(&self, item: ItemId, loader: LoaderKey) -> Option<Value> {
        self.inner.get_value(item, loader)
    }

    /// Returns true if a value of `loader` for `item` is cached, absent
    /// values included.
    pub fn has_value(&self, item: ItemId, loader: LoaderKey) -> bool {
        self.inner.data.read().values.contains_key(&(item, loader))
    }

    /// ICN of the last applied update.
    pub fn icn(&self) -> Icn {
        self.inner.data.read().icn
    }

    /// Number of live slices.
    pub fn slice_count(&self) -> usize {
        self.inner.slices.read().len()
    }

    /// Number of completed update cycles.
    pub fn update_count(&self) -> u64 {
        self.inner.cycles.load(Ordering::SeqCst)
    }

    /// Asks for an update cycle even without store changes.
    pub fn request_update(&self) {
        self.inner.request_update();
    }

    /// Waits until no update is requested or running. Returns false on
    /// timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.idle_lock.lock();
        loop {
            let idle = self.inner.request.load(Ordering::SeqCst) == REQ_NO
                || self.inner.is_stopped();
            if idle {
                return true;
            }
            if self.inner.idle.wait_until(&mut guard, deadline).timed_out() {
                return self.inner.request.load(Ordering::SeqCst) == REQ_NO;
            }
        }
    }
}

impl fmt::Debug for DbImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbImage")
            .field("running", &self.is_running())
            .field("slices", &self.slice_count())
            .field("icn", &self.icn())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> DbImage {
        DbImage::with_config(
            Store::new(),
            Gate::Straight,
            ImageConfig::default().with_update_thread_name("image-unit"),
        )
    }

    #[test]
    fn request_states_coalesce() {
        let image = image();
        let inner = &image.inner;
        inner.request_update();
        assert_eq!(inner.request.load(Ordering::SeqCst), REQ_WAITING);
        inner.request_update();
        assert_eq!(inner.request.load(Ordering::SeqCst), REQ_WAITING);

        inner.request.store(REQ_RUNNING, Ordering::SeqCst);
        inner.request_update();
        assert_eq!(inner.request.load(Ordering::SeqCst), REQ_RESTART);
        inner.request_update();
        assert_eq!(inner.request.load(Ordering::SeqCst), REQ_RESTART);
    }

    #[test]
    fn start_twice_and_stop() {
        let image = image();
        image.start().unwrap();
        image.start().unwrap();
        assert!(image.is_running());
        image.stop();
        assert!(!image.is_running());
        assert_eq!(image.start(), Err(CacheError::Stopped));
        assert!(matches!(image.manual_slice(&[]), Err(CacheError::Stopped)));
    }

    #[test]
    fn concurrent_start_runs_startup_once() {
        let image = image();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let image = image.clone();
                thread::spawn(move || image.start())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(()));
        }
        assert!(image.is_running());
        assert_eq!(image.inner.store.listener_count(), 1);
        image.stop();
        assert_eq!(image.inner.store.listener_count(), 0);
    }

    #[test]
    fn stop_buries_slices() {
        let image = image();
        image.start().unwrap();
        let slice = image.manual_slice(&[]).unwrap();
        assert!(image.wait_idle(Duration::from_secs(5)));
        assert_eq!(slice.state(), SliceState::Running);
        image.stop();
        assert_eq!(slice.state(), SliceState::Buried);
        assert_eq!(image.slice_count(), 0);
    }
}
