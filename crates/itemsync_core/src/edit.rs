//! Edit sessions.
//!
//! An edit locks its items for its whole lifetime. Its phases are
//! `Init -> Preparing -> Editing <-> Committing -> CommitDone`, and any phase
//! may end in `Released`. The manager keeps one [`EditCounterpart`] per
//! session in its lock table; callers hold [`EditControl`] handles to it.

use crate::branch::collect_base;
use crate::drain::EditDrain;
use crate::error::SyncError;
use crate::manager::ManagerInner;
use itemsync_store::{Aborted, AttributeMap, ItemId, Reader};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Builds the interactive side of an edit.
pub trait EditorFactory: Send + Sync {
    /// Called in a read transaction once the items are locked. Returning
    /// `Ok(None)` cancels the edit.
    fn prepare_edit(
        &self,
        prepare: &mut EditPrepare<'_>,
    ) -> Result<Option<Arc<dyn ItemEditor>>, Aborted>;

    /// Called when the edit ended before an editor was shown.
    fn edit_cancelled(&self) {}
}

/// The interactive side of an edit.
pub trait ItemEditor: Send + Sync {
    /// Polled to detect editors that went away without releasing.
    fn is_alive(&self) -> bool;

    /// Shows the editor. An error releases the edit.
    fn show_editor(&self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Called once the edit lock is gone.
    fn on_edit_released(&self) {}

    /// Another commit changed locked items without taking the lock.
    fn on_items_changed(&self, _changes: &BTreeMap<ItemId, AttributeMap>) {}
}

/// Writes an edit.
pub trait EditCommit: Send {
    /// Runs inside the write transaction. An error aborts it.
    fn perform_commit(&mut self, drain: &mut EditDrain<'_>) -> Result<(), Aborted>;

    /// Called after the transaction finished, possibly on a store thread.
    fn on_commit_finished(&mut self, _success: bool) {}
}

impl<F> EditCommit for F
where
    F: FnMut(&mut EditDrain<'_>) -> Result<(), Aborted> + Send,
{
    fn perform_commit(&mut self, drain: &mut EditDrain<'_>) -> Result<(), Aborted> {
        self(drain)
    }
}

/// Lifecycle phase of an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditPhase {
    /// Items locked, editor not started.
    Init,
    /// Editor factory running.
    Preparing,
    /// Editor shown.
    Editing,
    /// Commit transaction queued or running.
    Committing,
    /// Commit succeeded.
    CommitDone,
    /// Locks dropped.
    Released,
}

struct EditState {
    phase: EditPhase,
    items: Vec<ItemId>,
    bases: BTreeMap<ItemId, AttributeMap>,
    factory: Option<Arc<dyn EditorFactory>>,
    editor: Option<Arc<dyn ItemEditor>>,
    merge_when_released: BTreeSet<ItemId>,
    release_requested: bool,
    explicitly_released: bool,
    /// No interactive editor: release after the commit whatever its outcome.
    auto_release: bool,
}

/// The lock table's record of one edit.
pub(crate) struct EditCounterpart {
    manager: Weak<ManagerInner>,
    state: Mutex<EditState>,
}

impl EditCounterpart {
    pub(crate) fn new(manager: Weak<ManagerInner>, items: Vec<ItemId>, auto_release: bool) -> Arc<Self> {
        Arc::new(Self {
            manager,
            state: Mutex::new(EditState {
                phase: EditPhase::Init,
                items,
                bases: BTreeMap::new(),
                factory: None,
                editor: None,
                merge_when_released: BTreeSet::new(),
                release_requested: false,
                explicitly_released: false,
                auto_release,
            }),
        })
    }

    pub(crate) fn manager(&self) -> Option<Arc<ManagerInner>> {
        self.manager.upgrade()
    }

    pub(crate) fn items(&self) -> Vec<ItemId> {
        self.state.lock().items.clone()
    }

    pub(crate) fn phase(&self) -> EditPhase {
        self.state.lock().phase
    }

    pub(crate) fn bases(&self) -> BTreeMap<ItemId, AttributeMap> {
        self.state.lock().bases.clone()
    }

    pub(crate) fn base(&self, item: ItemId) -> Option<AttributeMap> {
        self.state.lock().bases.get(&item).cloned()
    }

    pub(crate) fn editor(&self) -> Option<Arc<dyn ItemEditor>> {
        self.state.lock().editor.clone()
    }

    pub(crate) fn factory(&self) -> Option<Arc<dyn EditorFactory>> {
        self.state.lock().factory.clone()
    }

    pub(crate) fn set_phase(&self, phase: EditPhase) {
        self.state.lock().phase = phase;
    }

    fn add_items(&self, items: &[ItemId]) {
        let mut state = self.state.lock();
        for item in items {
            if !state.items.contains(item) {
                state.items.push(*item);
            }
        }
        state.items.sort_unstable();
    }

    /// Records bases of items that have none yet.
    pub(crate) fn add_bases(&self, bases: BTreeMap<ItemId, AttributeMap>) {
        let mut state = self.state.lock();
        for (item, base) in bases {
            state.bases.entry(item).or_insert(base);
        }
    }

    /// The edit is neither released nor abandoned by its editor.
    pub(crate) fn is_alive(&self) -> bool {
        let editor = {
            let state = self.state.lock();
            if matches!(state.phase, EditPhase::Released | EditPhase::CommitDone) {
                return false;
            }
            state.editor.clone()
        };
        editor.map_or(true, |editor| editor.is_alive())
    }

    /// Queues a merge of `item` for when the edit ends. Returns false if it
    /// already ended.
    pub(crate) fn merge_later(&self, item: ItemId) -> bool {
        let mut state = self.state.lock();
        if state.phase == EditPhase::Released {
            return false;
        }
        state.merge_when_released.insert(item);
        true
    }

    /// Moves `Init` to `Preparing`. Returns false in any other phase.
    fn begin_prepare(&self, factory: Arc<dyn EditorFactory>) -> bool {
        let mut state = self.state.lock();
        if state.phase != EditPhase::Init {
            return false;
        }
        state.phase = EditPhase::Preparing;
        state.factory = Some(factory);
        true
    }

    /// Delivers the factory's outcome.
    pub(crate) fn prepared(
        self: &Arc<Self>,
        outcome: Result<(Option<Arc<dyn ItemEditor>>, BTreeMap<ItemId, AttributeMap>), SyncError>,
    ) {
        let factory = self.factory();
        let (editor, bases) = match outcome {
            Ok((Some(editor), bases)) => (editor, bases),
            Ok((None, _)) => {
                debug!(items = ?self.items(), "editor factory declined");
                self.cancel_prepare(factory);
                return;
            }
            Err(err) => {
                warn!(items = ?self.items(), error = %err, "edit preparation failed");
                self.cancel_prepare(factory);
                return;
            }
        };
        let editing = {
            let mut state = self.state.lock();
            if state.phase == EditPhase::Preparing {
                state.phase = EditPhase::Editing;
                state.editor = Some(Arc::clone(&editor));
                for (item, base) in bases {
                    state.bases.entry(item).or_insert(base);
                }
                true
            } else {
                false
            }
        };
        if !editing {
            // Released while the factory ran.
            editor.on_edit_released();
            return;
        }
        if let Some(manager) = self.manager() {
            manager.modifiable.fire_changed();
        }
        if let Err(err) = editor.show_editor() {
            warn!(items = ?self.items(), error = %err, "editor failed to show");
            self.release();
        }
    }

    fn cancel_prepare(self: &Arc<Self>, factory: Option<Arc<dyn EditorFactory>>) {
        self.release();
        if let Some(factory) = factory {
            factory.edit_cancelled();
        }
    }

    /// Moves `Editing` to `Committing`.
    ///
    /// # Panics
    ///
    /// Panics if the editor was never started.
    pub(crate) fn begin_commit(&self) -> bool {
        let mut state = self.state.lock();
        match state.phase {
            EditPhase::Editing => {
                state.phase = EditPhase::Committing;
                true
            }
            EditPhase::Committing | EditPhase::CommitDone | EditPhase::Released => false,
            phase @ (EditPhase::Init | EditPhase::Preparing) => {
                panic!("commit of edit {:?} that is not editing ({phase:?})", state.items)
            }
        }
    }

    /// Called once the commit transaction finished.
    pub(crate) fn commit_finished(self: &Arc<Self>, success: bool) {
        let release = {
            let mut state = self.state.lock();
            if state.phase != EditPhase::Committing {
                return;
            }
            if success {
                state.phase = EditPhase::CommitDone;
                true
            } else {
                state.phase = EditPhase::Editing;
                state.release_requested || state.auto_release
            }
        };
        if release {
            self.release();
        }
    }

    /// Releases the locks of an edit whose editor went away.
    pub(crate) fn release_abandoned(self: &Arc<Self>) {
        self.release();
    }

    /// Drops the locks. A running commit postpones the release until it
    /// finished.
    pub(crate) fn release(self: &Arc<Self>) {
        let (editor, deferred) = {
            let mut state = self.state.lock();
            match state.phase {
                EditPhase::Released => return,
                EditPhase::Committing => {
                    state.release_requested = true;
                    return;
                }
                _ => {}
            }
            state.phase = EditPhase::Released;
            (
                state.editor.take(),
                std::mem::take(&mut state.merge_when_released),
            )
        };
        let Some(manager) = self.manager() else {
            return;
        };
        manager.locks.unlock(self);
        manager.modifiable.fire_changed();
        debug!(items = ?self.items(), "edit released");
        if let Some(editor) = editor {
            manager.gate.execute(move || editor.on_edit_released());
        }
        if !deferred.is_empty() {
            let items: Vec<ItemId> = deferred.into_iter().collect();
            debug!(items = ?items, "running merges deferred by edit");
            // The result arrives as a merge event.
            let _ = manager.request_auto_merge(&items);
        }
    }
}

/// Handle to an edit session.
///
/// The handle returned by `prepare_edit` owns the session: dropping it
/// before [`EditControl::start`] releases the locks. Clones and handles
/// from `find_lock` never release on drop.
pub struct EditControl {
    counterpart: Arc<EditCounterpart>,
    owner: bool,
}

impl EditControl {
    pub(crate) fn owner(counterpart: Arc<EditCounterpart>) -> Self {
        Self {
            counterpart,
            owner: true,
        }
    }

    pub(crate) fn handle(counterpart: Arc<EditCounterpart>) -> Self {
        Self {
            counterpart,
            owner: false,
        }
    }

    /// Locked items, sorted.
    pub fn items(&self) -> Vec<ItemId> {
        self.counterpart.items()
    }

    /// Current phase.
    pub fn phase(&self) -> EditPhase {
        self.counterpart.phase()
    }

    /// Base recorded for `item` when the edit started.
    pub fn base(&self, item: ItemId) -> Option<AttributeMap> {
        self.counterpart.base(item)
    }

    /// Starts the editor. Returns false if the edit already started or
    /// lost any of its locks.
    pub fn start(&self, factory: Arc<dyn EditorFactory>) -> bool {
        let Some(manager) = self.counterpart.manager() else {
            return false;
        };
        if !manager.locks.holds_all(&self.items(), &self.counterpart) {
            return false;
        }
        if !self.counterpart.begin_prepare(factory) {
            return false;
        }
        manager.start_edit(Arc::clone(&self.counterpart));
        true
    }

    /// Adds items to the edit and loads them with `loader` in a read
    /// transaction.
    ///
    /// Returns false, adding nothing, if any new item is locked elsewhere.
    /// A failing loader leaves the new items locked; they are released
    /// with the edit.
    pub fn include<F>(&self, items: &[ItemId], loader: F) -> bool
    where
        F: FnOnce(&dyn Reader, &[ItemId]) -> Result<(), Aborted> + Send + 'static,
    {
        if matches!(self.phase(), EditPhase::Released | EditPhase::CommitDone) {
            return false;
        }
        let Some(manager) = self.counterpart.manager() else {
            return false;
        };
        let current = self.items();
        let mut added: Vec<ItemId> = items
            .iter()
            .copied()
            .filter(|item| !current.contains(item))
            .collect();
        added.sort_unstable();
        added.dedup();
        if added.is_empty() {
            return true;
        }
        if !manager.locks.try_lock_all(&added, &self.counterpart) {
            debug!(items = ?added, "include refused, items locked");
            return false;
        }
        self.counterpart.add_items(&added);
        manager.modifiable.fire_changed();
        let counterpart = Arc::clone(&self.counterpart);
        manager
            .store
            .read(move |reader| {
                let bases = added
                    .iter()
                    .map(|item| (*item, collect_base(reader, *item)))
                    .collect();
                counterpart.add_bases(bases);
                loader(reader, &added)
            })
            .on_done(|result| {
                if let Err(err) = result {
                    warn!(error = %err, "include loader failed, items stay locked");
                }
            });
        true
    }

    /// Commits the edit. Returns false if a commit is already running or
    /// the edit ended.
    ///
    /// # Panics
    ///
    /// Panics if the editor was never started.
    pub fn commit(&self, commit: impl EditCommit + 'static) -> bool {
        let Some(manager) = self.counterpart.manager() else {
            return false;
        };
        if !self.counterpart.begin_commit() {
            return false;
        }
        let bases = self.counterpart.bases();
        manager.run_commit(
            Some(Arc::clone(&self.counterpart)),
            crate::manager::CommitScope::Locked(bases),
            Box::new(commit),
        );
        true
    }

    /// Requests the release of the edit. Takes effect after a running
    /// commit finished.
    ///
    /// # Panics
    ///
    /// Panics if the edit was already released through a handle.
    pub fn release(&self) {
        {
            let mut state = self.counterpart.state.lock();
            assert!(
                !state.explicitly_released,
                "edit of {:?} released twice",
                state.items
            );
            state.explicitly_released = true;
        }
        self.counterpart.release();
    }

    /// Polls the editor. An editor that went away releases the edit.
    pub fn is_alive(&self) -> bool {
        let alive = self.counterpart.is_alive();
        if !alive {
            self.counterpart.release_abandoned();
        }
        alive
    }

    /// The editor factory is running.
    pub fn is_preparing(&self) -> bool {
        self.phase() == EditPhase::Preparing
    }

    /// A commit is running.
    pub fn is_committing(&self) -> bool {
        self.phase() == EditPhase::Committing
    }
}

impl Clone for EditControl {
    fn clone(&self) -> Self {
        Self::handle(Arc::clone(&self.counterpart))
    }
}

impl Drop for EditControl {
    fn drop(&mut self) {
        if self.owner && self.counterpart.phase() == EditPhase::Init {
            self.counterpart.release();
        }
    }
}

impl fmt::Debug for EditControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditControl")
            .field("items", &self.items())
            .field("phase", &self.phase())
            .finish()
    }
}

/// What an [`EditorFactory`] sees while preparing.
pub struct EditPrepare<'a> {
    reader: &'a dyn Reader,
    control: &'a EditControl,
    manager: &'a ManagerInner,
}

impl<'a> EditPrepare<'a> {
    pub(crate) fn new(reader: &'a dyn Reader, control: &'a EditControl, manager: &'a ManagerInner) -> Self {
        Self {
            reader,
            control,
            manager,
        }
    }

    /// Read transaction the edit is prepared in.
    pub fn reader(&self) -> &dyn Reader {
        self.reader
    }

    /// Locked items.
    pub fn items(&self) -> Vec<ItemId> {
        self.control.items()
    }

    /// Handle the editor can commit and release through.
    pub fn control(&self) -> &EditControl {
        self.control
    }

    /// Locks more items for this edit, all or none.
    pub fn add_items(&mut self, items: &[ItemId]) -> bool {
        let counterpart = &self.control.counterpart;
        if !self.manager.locks.try_lock_all(items, counterpart) {
            return false;
        }
        counterpart.add_items(items);
        true
    }
}
