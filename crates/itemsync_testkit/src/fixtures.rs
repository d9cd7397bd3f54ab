//! Store and sync manager fixtures.
//!
//! The fixture runs callbacks straight on the store threads, so results
//! are visible as soon as the transaction handle completes.

use itemsync_core::{
    DownloadDrain, Drain, EditCommit, EditDrain, Readable, SyncConfig, SyncManager, SyncState,
    Writable,
};
use itemsync_store::{Aborted, Attribute, Gate, ItemId, Reader, Store, Value};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use std::time::Duration;

/// How long fixture helpers wait for background work.
pub const WAIT: Duration = Duration::from_secs(5);

/// A store with a sync manager on top.
pub struct SyncFixture {
    /// The store.
    pub store: Store,
    /// The manager.
    pub manager: SyncManager,
}

impl SyncFixture {
    /// Creates a fixture delivering callbacks on the calling thread.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Creates a fixture with the given manager configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        let store = Store::new();
        let manager = SyncManager::with_config(store.clone(), Gate::Straight, config);
        Self { store, manager }
    }

    /// Creates an item as if downloaded from the server.
    pub fn create_synced(&self, values: &[(&Attribute, Value)]) -> ItemId {
        let values: Vec<(Attribute, Value)> = values
            .iter()
            .map(|(attribute, value)| ((*attribute).clone(), value.clone()))
            .collect();
        let (tx, rx) = mpsc::channel();
        self.manager
            .download(move |drain: &mut DownloadDrain<'_>| {
                let mut creator = drain.create_item();
                for (attribute, value) in &values {
                    creator.set_value(attribute, Some(value.clone()));
                }
                let _ = tx.send(creator.item());
                Ok(())
            })
            .wait()
            .expect("download of new item");
        rx.recv_timeout(WAIT).expect("created item")
    }

    /// Creates a slave of `master` as if downloaded from the server.
    pub fn create_synced_slave(
        &self,
        master: ItemId,
        master_ref: &Attribute,
        values: &[(&Attribute, Value)],
    ) -> ItemId {
        let slave = self.create_synced(values);
        self.download_values(slave, &[(master_ref, Value::Ref(master))]);
        slave
    }

    /// Writes server values of an existing item and returns the merged
    /// states.
    pub fn download_values(
        &self,
        item: ItemId,
        values: &[(&Attribute, Value)],
    ) -> BTreeMap<ItemId, SyncState> {
        let values: Vec<(Attribute, Option<Value>)> = values
            .iter()
            .map(|(attribute, value)| ((*attribute).clone(), value.clone().normalized()))
            .collect();
        self.manager
            .download(move |drain: &mut DownloadDrain<'_>| {
                let mut creator = drain.change_item(item);
                for (attribute, value) in &values {
                    creator.set_value(attribute, value.clone());
                }
                Ok(())
            })
            .wait()
            .expect("download")
    }

    /// Marks an item deleted on the server.
    pub fn download_delete(&self, item: ItemId) -> BTreeMap<ItemId, SyncState> {
        self.manager
            .download(move |drain: &mut DownloadDrain<'_>| {
                drain.change_item(item).delete();
                Ok(())
            })
            .wait()
            .expect("download delete")
    }

    /// Locks `items`, commits and waits for the commit to finish.
    pub fn commit<F>(&self, items: &[ItemId], commit: F) -> bool
    where
        F: FnMut(&mut EditDrain<'_>) -> Result<(), Aborted> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        if !self.manager.commit_edit(items, Waiting::new(commit, tx)) {
            return false;
        }
        rx.recv_timeout(WAIT).expect("commit finished")
    }

    /// Commits without locks and waits for the commit to finish.
    pub fn commit_unlocked<F>(&self, commit: F) -> bool
    where
        F: FnMut(&mut EditDrain<'_>) -> Result<(), Aborted> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.manager
            .commit_edit_unlocked(Waiting::new(commit, tx));
        rx.recv_timeout(WAIT).expect("commit finished")
    }

    /// Sets one TRUNK value through a locked commit.
    pub fn edit(&self, item: ItemId, attribute: &Attribute, value: impl Into<Value>) -> bool {
        let attribute = attribute.clone();
        let value = value.into();
        self.commit(&[item], move |drain: &mut EditDrain<'_>| {
            drain
                .change_item(item)
                .set_value(&attribute, Some(value.clone()));
            Ok(())
        })
    }

    /// Deletes an item locally.
    pub fn delete(&self, item: ItemId) -> bool {
        self.commit(&[item], move |drain: &mut EditDrain<'_>| {
            drain.change_item(item).delete();
            Ok(())
        })
    }

    /// Sync state of `item`.
    pub fn state(&self, item: ItemId) -> SyncState {
        self.manager.sync_state(item).expect("sync state")
    }

    /// TRUNK value of `attribute`.
    pub fn trunk(&self, item: ItemId, attribute: &Attribute) -> Option<Value> {
        self.read(|reader| reader.get(item, attribute))
    }

    /// Runs a read on the calling thread.
    pub fn read<T>(&self, body: impl FnOnce(&dyn Reader) -> T) -> T {
        self.store
            .read_now(|reader| Ok(body(reader)))
            .expect("read transaction")
    }
}

impl Default for SyncFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Reports the commit outcome over a channel.
struct Waiting<F> {
    commit: F,
    done: Sender<bool>,
}

impl<F> Waiting<F> {
    fn new(commit: F, done: Sender<bool>) -> Self {
        Self { commit, done }
    }
}

impl<F> EditCommit for Waiting<F>
where
    F: FnMut(&mut EditDrain<'_>) -> Result<(), Aborted> + Send,
{
    fn perform_commit(&mut self, drain: &mut EditDrain<'_>) -> Result<(), Aborted> {
        (self.commit)(drain)
    }

    fn on_commit_finished(&mut self, success: bool) {
        let _ = self.done.send(success);
    }
}
