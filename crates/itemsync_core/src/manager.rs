//! The sync manager: edit locks, commits, downloads, uploads and merges.

use crate::branch::collect_base;
use crate::config::SyncConfig;
use crate::download::{DownloadDrain, DownloadProcedure};
use crate::drain::{EditDrain, Notifications};
use crate::edit::{EditCommit, EditControl, EditCounterpart, EditPhase, EditPrepare};
use crate::error::{SyncError, SyncResult};
use crate::locks::{DeferredStart, EditLocks, ShortLock, UploadLocks};
use crate::merge::{merge_item, MergeEvent, MergeListener, MergeSelector, NoAutoMerge};
use crate::schema::UPLOAD_TASK;
use crate::state::SyncState;
use crate::upload::{ItemUploader, UploadOutcome, UploadPrepare, UploadProcess};
use itemsync_store::{
    Aborted, AttributeMap, DbResult, Gate, ItemId, Lifespan, Modifiable, Reader, Store, Writer,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a commit takes the bases of its items from.
pub(crate) enum CommitScope {
    /// Bases collected when the edit started.
    Locked(BTreeMap<ItemId, AttributeMap>),
    /// Items locked just for this commit; bases are read in the commit.
    Collect(Vec<ItemId>),
    /// No locked items.
    CreateOnly,
}

impl CommitScope {
    fn bases(self, reader: &dyn Reader) -> BTreeMap<ItemId, AttributeMap> {
        match self {
            Self::Locked(bases) => bases,
            Self::Collect(items) => items
                .into_iter()
                .map(|item| (item, collect_base(reader, item)))
                .collect(),
            Self::CreateOnly => BTreeMap::new(),
        }
    }
}

pub(crate) struct ManagerInner {
    pub(crate) store: Store,
    pub(crate) gate: Gate,
    pub(crate) config: SyncConfig,
    pub(crate) locks: EditLocks,
    pub(crate) uploads: UploadLocks,
    pub(crate) modifiable: Modifiable,
    selector: RwLock<Arc<dyn MergeSelector>>,
    listeners: RwLock<Vec<(u64, Arc<dyn MergeListener>)>>,
    next_listener: AtomicU64,
}

impl ManagerInner {
    /// Runs the editor factory of a started edit in a read transaction and
    /// delivers the outcome on the gate.
    pub(crate) fn start_edit(self: &Arc<Self>, counterpart: Arc<EditCounterpart>) {
        let items = counterpart.items();
        let retry: DeferredStart = {
            let manager = Arc::downgrade(self);
            let counterpart = Arc::clone(&counterpart);
            Box::new(move || {
                if let Some(manager) = manager.upgrade() {
                    manager.start_edit(counterpart);
                }
            })
        };
        if self.locks.defer_if_short_locked(&items, retry).is_none() {
            debug!(items = ?items, "edit start waits for a running merge");
            return;
        }

        let manager = Arc::clone(self);
        let preparing = Arc::clone(&counterpart);
        let gate = self.gate.clone();
        self.store
            .read(move |reader| {
                let control = EditControl::handle(Arc::clone(&preparing));
                let editor = match preparing.factory() {
                    Some(factory) => {
                        let mut prepare = EditPrepare::new(reader, &control, &manager);
                        factory.prepare_edit(&mut prepare)?
                    }
                    None => None,
                };
                let bases: BTreeMap<ItemId, AttributeMap> = preparing
                    .items()
                    .into_iter()
                    .map(|item| (item, collect_base(reader, item)))
                    .collect();
                Ok((editor, bases))
            })
            .on_done(move |result| {
                gate.execute(move || counterpart.prepared(result.map_err(SyncError::from)));
            });
    }

    /// Queues a commit transaction.
    pub(crate) fn run_commit(
        self: &Arc<Self>,
        owner: Option<Arc<EditCounterpart>>,
        scope: CommitScope,
        commit: Box<dyn EditCommit>,
    ) {
        let commit = Arc::new(Mutex::new(commit));
        let manager = Arc::clone(self);
        let performing = Arc::clone(&commit);
        let committer = owner.clone();
        let result = self.store.write(move |writer| {
            let bases = scope.bases(writer.as_reader());
            let outcome = {
                let mut drain = EditDrain::new(writer, &manager, committer.clone(), bases);
                performing.lock().perform_commit(&mut drain)?;
                drain.finish()?
            };
            let changed: Vec<ItemId> = outcome.changed.iter().copied().collect();
            manager.merge_in(writer, &changed, committer.as_ref())?;
            Ok(outcome.notifications)
        });

        let manager = Arc::clone(self);
        result.on_done(move |result| {
            let success = match result {
                Ok(notifications) => {
                    manager.notify_concurrent(notifications);
                    true
                }
                Err(err) => {
                    warn!(error = %err, "commit failed");
                    false
                }
            };
            if let Some(owner) = &owner {
                owner.commit_finished(success);
            }
            commit.lock().on_commit_finished(success);
        });
    }

    fn notify_concurrent(&self, notifications: Notifications) {
        for (holder, changes) in notifications {
            let Some(editor) = holder.editor() else {
                continue;
            };
            debug!(items = ?changes.keys().collect::<Vec<_>>(), "notifying concurrent editor");
            self.gate.execute(move || editor.on_items_changed(&changes));
        }
    }

    /// Merges `items` inside `writer` and returns their new states.
    ///
    /// Items under upload are skipped. Items locked by a live edit other
    /// than `ignore` are merged when that edit is released.
    pub(crate) fn merge_in(
        self: &Arc<Self>,
        writer: &mut dyn Writer,
        items: &[ItemId],
        ignore: Option<&Arc<EditCounterpart>>,
    ) -> Result<BTreeMap<ItemId, SyncState>, Aborted> {
        let mut locked = Vec::new();
        for item in items {
            if writer.as_reader().get(*item, &UPLOAD_TASK).is_some() {
                continue;
            }
            if self.lock_or_merge_later(*item, ignore) {
                locked.push(*item);
            }
        }
        if locked.is_empty() {
            return Ok(BTreeMap::new());
        }
        let manager = Arc::clone(self);
        let short = locked.clone();
        writer.finally_do(Box::new(move |_| {
            for start in manager.locks.release_short(&short) {
                start();
            }
        }));

        let selector = self.selector.read().clone();
        let mut merged = BTreeMap::new();
        for item in locked {
            let state = merge_item(writer, item, selector.as_ref())?;
            merged.insert(item, state);
        }

        let manager = Arc::clone(self);
        let event = MergeEvent {
            icn: writer.icn(),
            items: merged.clone(),
        };
        writer.finally_do(Box::new(move |committed| {
            if committed {
                manager.fire_merged(event);
            }
        }));
        Ok(merged)
    }

    /// Short-locks `item`, or queues its merge on the edit holding it.
    fn lock_or_merge_later(&self, item: ItemId, ignore: Option<&Arc<EditCounterpart>>) -> bool {
        for _ in 0..self.config.merge_lock_attempts.max(1) {
            match self.locks.short_lock(item, ignore) {
                ShortLock::Acquired => return true,
                ShortLock::Held(holder) => {
                    if !holder.is_alive() {
                        holder.release_abandoned();
                        continue;
                    }
                    if holder.merge_later(item) {
                        debug!(item = %item, "merge deferred until edit is released");
                        return false;
                    }
                }
            }
        }
        warn!(item = %item, "merge skipped, edit lock kept changing");
        false
    }

    /// Runs merges queued by released edits.
    pub(crate) fn request_auto_merge(
        self: &Arc<Self>,
        items: &[ItemId],
    ) -> DbResult<BTreeMap<ItemId, SyncState>> {
        let manager = Arc::clone(self);
        let items = items.to_vec();
        self.store
            .write(move |writer| manager.merge_in(writer, &items, None))
    }

    fn fire_merged(&self, event: MergeEvent) {
        let listeners: Vec<Arc<dyn MergeListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        self.gate.execute(move || {
            for listener in listeners {
                listener.on_items_merged(&event);
            }
        });
    }
}

/// Entry point of the sync core.
///
/// The manager serializes edits through an all-or-nothing per-item lock
/// table, runs commits, downloads and upload write-backs as store write
/// transactions, and merges server state into TRUNK. Results are delivered
/// through callbacks on the manager's [`Gate`].
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<ManagerInner>,
}

impl SyncManager {
    /// Creates a manager with default configuration.
    pub fn new(store: Store, gate: Gate) -> Self {
        Self::with_config(store, gate, SyncConfig::default())
    }

    /// Creates a manager.
    pub fn with_config(store: Store, gate: Gate, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                gate,
                config,
                locks: EditLocks::default(),
                uploads: UploadLocks::default(),
                modifiable: Modifiable::new(),
                selector: RwLock::new(Arc::new(NoAutoMerge)),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Replaces the merge logic used by every following merge.
    pub fn set_merge_selector(&self, selector: Arc<dyn MergeSelector>) {
        *self.inner.selector.write() = selector;
    }

    /// Locks every item in `items` for a new edit, or none of them.
    ///
    /// Returns `None` if any item is locked by a live edit.
    pub fn prepare_edit(&self, items: &[ItemId]) -> Option<EditControl> {
        let items = sorted(items);
        let counterpart = EditCounterpart::new(Arc::downgrade(&self.inner), items.clone(), false);
        if !self.inner.locks.try_lock_all(&items, &counterpart) {
            debug!(items = ?items, "edit refused, items locked");
            return None;
        }
        self.inner.modifiable.fire_changed();
        Some(EditControl::owner(counterpart))
    }

    /// Handle to the edit locking `item`.
    pub fn find_lock(&self, item: ItemId) -> Option<EditControl> {
        self.inner.locks.holder(item).map(EditControl::handle)
    }

    /// Returns true if an edit locks `item`.
    pub fn is_locked(&self, item: ItemId) -> bool {
        self.inner.locks.is_locked(item)
    }

    /// Number of items locked by edits.
    pub fn locked_count(&self) -> usize {
        self.inner.locks.len()
    }

    /// Returns true if an upload holds `item`.
    pub fn is_upload_locked(&self, item: ItemId) -> bool {
        self.inner.uploads.is_locked(item)
    }

    /// Locks `items` and commits without an editor. The locks are dropped
    /// once the commit finished, whatever its outcome.
    ///
    /// Returns false if any item is locked.
    pub fn commit_edit(&self, items: &[ItemId], commit: impl EditCommit + 'static) -> bool {
        let items = sorted(items);
        let counterpart = EditCounterpart::new(Arc::downgrade(&self.inner), items.clone(), true);
        if !self.inner.locks.try_lock_all(&items, &counterpart) {
            debug!(items = ?items, "commit refused, items locked");
            return false;
        }
        counterpart.set_phase(EditPhase::Committing);
        self.inner.modifiable.fire_changed();
        self.inner.run_commit(
            Some(counterpart),
            CommitScope::Collect(items),
            Box::new(commit),
        );
        true
    }

    /// Commits without locking anything.
    ///
    /// Shadowable writes are accepted only on items created by the commit
    /// and through [`EditDrain::unsafe_change`]; any other one aborts it.
    pub fn commit_edit_unlocked(&self, commit: impl EditCommit + 'static) {
        self.inner
            .run_commit(None, CommitScope::CreateOnly, Box::new(commit));
    }

    /// Writes downloaded server state and merges the items that got a
    /// DOWNLOAD shadow.
    pub fn download<F>(&self, body: F) -> DbResult<BTreeMap<ItemId, SyncState>>
    where
        F: FnOnce(&mut DownloadDrain<'_>) -> Result<(), Aborted> + Send + 'static,
    {
        let manager = Arc::clone(&self.inner);
        self.inner.store.write(move |writer| {
            let shadowed = {
                let mut drain = DownloadDrain::new(writer, &manager);
                body(&mut drain)?;
                drain.shadowed_items()
            };
            manager.merge_in(writer, &shadowed, None)
        })
    }

    /// Runs a [`DownloadProcedure`] in a download transaction.
    pub fn write_downloaded(
        &self,
        procedure: impl DownloadProcedure + 'static,
    ) -> DbResult<BTreeMap<ItemId, SyncState>> {
        let procedure = Arc::new(Mutex::new(procedure));
        let finished = Arc::clone(&procedure);
        self.download(move |drain| {
            drain.finally_do(Box::new(move |committed| {
                finished.lock().on_finished(committed);
            }));
            procedure.lock().write(drain)
        })
    }

    /// Runs one upload: prepare, `do_upload` and the final cancel of
    /// unfinished items. Blocks the calling thread; must not be called
    /// from inside a store transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the prepare transaction failed.
    pub fn sync_upload(&self, uploader: Arc<dyn ItemUploader>) -> SyncResult<UploadOutcome> {
        let manager = Arc::clone(&self.inner);
        let preparing = Arc::clone(&uploader);
        let (items, attempts) = self
            .inner
            .store
            .write(move |writer| {
                let mut prepare = UploadPrepare::new(writer, &manager);
                preparing.prepare(&mut prepare)?;
                Ok(prepare.finish())
            })
            .wait()?;
        if items.is_empty() {
            debug!("nothing to upload");
            return Ok(UploadOutcome::default());
        }
        info!(items = items.len(), "uploading");
        let process = UploadProcess::new(Arc::clone(&self.inner), items, attempts);
        uploader.do_upload(&process);
        Ok(process.upload_done())
    }

    /// Merges `items` now. Items locked by a live edit are merged when it
    /// is released.
    pub fn request_auto_merge(&self, items: &[ItemId]) -> DbResult<BTreeMap<ItemId, SyncState>> {
        self.inner.request_auto_merge(items)
    }

    /// Adds a merge listener for the duration of `life`. Events arrive on
    /// the manager's gate.
    pub fn add_listener(&self, life: &Lifespan, listener: Arc<dyn MergeListener>) {
        if life.is_ended() {
            return;
        }
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.write().push((id, listener));
        let inner = Arc::downgrade(&self.inner);
        life.add(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.write().retain(|(other, _)| *other != id);
            }
        });
    }

    /// Fires whenever the lock table changes.
    pub fn modifiable(&self) -> &Modifiable {
        &self.inner.modifiable
    }

    /// Current sync state of `item`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    pub fn sync_state(&self, item: ItemId) -> SyncResult<SyncState> {
        self.inner
            .store
            .read_now(|reader| Ok(SyncState::of(reader, item)))
            .map_err(SyncError::from)
    }

    /// Store the manager runs on.
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Gate callbacks are delivered on.
    pub fn gate(&self) -> &Gate {
        &self.inner.gate
    }

    /// Configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

impl fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncManager")
            .field("locked", &self.inner.locks.len())
            .field("gate", &self.inner.gate)
            .finish()
    }
}

fn sorted(items: &[ItemId]) -> Vec<ItemId> {
    let mut items = items.to_vec();
    items.sort_unstable();
    items.dedup();
    items
}
