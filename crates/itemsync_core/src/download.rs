//! Writing downloaded server state.
//!
//! An item with no local state and no lock takes server values straight
//! into TRUNK. Any other item gets them in its DOWNLOAD shadow, and is
//! merged once the download procedure finished.

use crate::branch::{last_server, trunk_shadowables, BranchSelector};
use crate::manager::ManagerInner;
use crate::schema::{BASE, CONFLICT, DONE_UPLOAD, DOWNLOAD, EXISTING, UPLOAD_TASK};
use crate::version::{Drain, DrainOps, ItemVersionCreator};
use bytes::Bytes;
use itemsync_store::{Aborted, Attribute, ItemId, Reader, Value, Writer};
use std::collections::BTreeMap;
use tracing::trace;

/// Writes a batch of downloaded server state.
pub trait DownloadProcedure: Send {
    /// Runs inside the download write transaction.
    fn write(&mut self, drain: &mut DownloadDrain<'_>) -> Result<(), Aborted>;

    /// Called once the transaction finished.
    fn on_finished(&mut self, _success: bool) {}
}

impl<F> DownloadProcedure for F
where
    F: FnMut(&mut DownloadDrain<'_>) -> Result<(), Aborted> + Send,
{
    fn write(&mut self, drain: &mut DownloadDrain<'_>) -> Result<(), Aborted> {
        self(drain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Server values go to TRUNK.
    Direct,
    /// Server values go to DOWNLOAD.
    Shadow,
}

/// Server-side drain. Creators read and write the server branch.
pub struct DownloadDrain<'a> {
    writer: &'a mut dyn Writer,
    manager: &'a ManagerInner,
    modes: BTreeMap<ItemId, WriteMode>,
}

impl<'a> DownloadDrain<'a> {
    pub(crate) fn new(writer: &'a mut dyn Writer, manager: &'a ManagerInner) -> Self {
        Self {
            writer,
            manager,
            modes: BTreeMap::new(),
        }
    }

    /// Items whose server values went to DOWNLOAD.
    pub fn shadowed_items(&self) -> Vec<ItemId> {
        self.modes
            .iter()
            .filter(|(_, mode)| **mode == WriteMode::Shadow)
            .map(|(item, _)| *item)
            .collect()
    }

    pub(crate) fn finally_do(&mut self, action: Box<dyn FnOnce(bool) + Send>) {
        self.writer.finally_do(action);
    }

    fn mode(&mut self, item: ItemId) -> WriteMode {
        if let Some(mode) = self.modes.get(&item) {
            return *mode;
        }
        let reader = self.writer.as_reader();
        let has_local_state = [&*BASE, &*CONFLICT, &*DOWNLOAD, &*DONE_UPLOAD, &*UPLOAD_TASK]
            .into_iter()
            .any(|attribute| reader.get(item, attribute).is_some());
        let mode = if has_local_state
            || self.manager.locks.is_locked(item)
            || self.manager.uploads.is_locked(item)
        {
            WriteMode::Shadow
        } else {
            WriteMode::Direct
        };
        trace!(item = %item, ?mode, "download write mode");
        self.modes.insert(item, mode);
        mode
    }
}

impl DrainOps for DownloadDrain<'_> {
    fn txn_reader(&self) -> &dyn Reader {
        self.writer.as_reader()
    }

    fn write_selector(&self) -> BranchSelector {
        BranchSelector::FollowServer
    }

    fn write_value(&mut self, item: ItemId, attribute: &Attribute, value: Option<Value>) {
        if !attribute.is_shadowable() || self.mode(item) == WriteMode::Direct {
            self.writer.set(item, attribute, value);
            return;
        }
        let reader = self.writer.as_reader();
        let mut download = reader
            .get_map(item, &DOWNLOAD)
            .or_else(|| last_server(reader, item))
            .unwrap_or_else(|| trunk_shadowables(reader, item));
        download.set(attribute, value);
        self.writer.set(item, &DOWNLOAD, Some(Value::Map(download)));
    }

    fn add_history(&mut self, item: ItemId, _kind: i64, _payload: Bytes) -> i32 {
        panic!("history of {item} is local and cannot be downloaded");
    }

    fn mark_merged(&mut self, item: ItemId) {
        panic!("{item} cannot be marked merged by a download");
    }

    fn new_item(&mut self) -> ItemId {
        let item = self.writer.create_item();
        self.modes.insert(item, WriteMode::Direct);
        self.writer.set(item, &EXISTING, Some(Value::Bool(true)));
        item
    }
}

impl Drain for DownloadDrain<'_> {
    fn reader(&self) -> &dyn Reader {
        self.writer.as_reader()
    }

    fn change_item(&mut self, item: ItemId) -> ItemVersionCreator<'_> {
        ItemVersionCreator::new(self, item)
    }

    fn create_item(&mut self) -> ItemVersionCreator<'_> {
        let item = self.new_item();
        ItemVersionCreator::new(self, item)
    }
}
