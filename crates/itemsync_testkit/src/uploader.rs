//! A scripted uploader.
//!
//! The "server" is a script: for each item it says which attributes the
//! upload confirms. Everything the uploader was asked to send is recorded.

use itemsync_core::schema::BASE;
use itemsync_core::{
    changed_attributes, ItemUploader, UploadPrepare, UploadProblemKind, UploadProcess,
    UploadRefusal,
};
use itemsync_store::{Aborted, Attribute, AttributeMap, ItemId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

use crate::fixtures::WAIT;

/// What the server does with one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadScript {
    /// Confirms every changed attribute and `history` records.
    All {
        /// Confirmed history records.
        history: usize,
    },
    /// Confirms only these attributes and `history` records.
    Attributes(Vec<Attribute>, usize),
    /// Confirms nothing.
    Cancel,
    /// Refuses the change with a message.
    Reject(String),
    /// Never answers; the item is left for the final cancel.
    Leave,
}

/// Uploader following an [`UploadScript`] per item.
pub struct ScriptedUploader {
    items: Vec<ItemId>,
    scripts: BTreeMap<ItemId, UploadScript>,
    sent: Mutex<BTreeMap<ItemId, AttributeMap>>,
    refused: Mutex<Vec<(ItemId, UploadRefusal)>>,
}

impl ScriptedUploader {
    /// Uploads `items`, confirming everything.
    pub fn new(items: &[ItemId]) -> Self {
        Self {
            items: items.to_vec(),
            scripts: BTreeMap::new(),
            sent: Mutex::new(BTreeMap::new()),
            refused: Mutex::new(Vec::new()),
        }
    }

    /// Sets the script of one item.
    #[must_use]
    pub fn script(mut self, item: ItemId, script: UploadScript) -> Self {
        self.scripts.insert(item, script);
        self
    }

    /// Values handed to the server, per item.
    pub fn sent(&self) -> BTreeMap<ItemId, AttributeMap> {
        self.sent.lock().clone()
    }

    /// Items refused at prepare, with the reason.
    pub fn refused(&self) -> Vec<(ItemId, UploadRefusal)> {
        self.refused.lock().clone()
    }

    fn script_of(&self, item: ItemId) -> UploadScript {
        self.scripts
            .get(&item)
            .cloned()
            .unwrap_or(UploadScript::All { history: usize::MAX })
    }
}

impl ItemUploader for ScriptedUploader {
    fn prepare(&self, prepare: &mut UploadPrepare<'_>) -> Result<(), Aborted> {
        for item in &self.items {
            match prepare.try_add_to_upload(*item) {
                Ok(task) => {
                    self.sent.lock().insert(*item, task);
                }
                Err(refusal) => self.refused.lock().push((*item, refusal)),
            }
        }
        Ok(())
    }

    fn do_upload(&self, process: &UploadProcess) {
        let scripts: Vec<(ItemId, UploadScript)> = process
            .items()
            .iter()
            .map(|item| (*item, self.script_of(*item)))
            .collect();
        let written = process.write_upload_state(move |drain| {
            for (item, script) in scripts {
                debug!(item = %item, ?script, "scripted upload");
                match script {
                    UploadScript::All { history } => {
                        let Some(task) = drain.upload_task(item) else {
                            continue;
                        };
                        let base = drain.reader().get_map(item, &BASE).unwrap_or_default();
                        let changed: Vec<Attribute> =
                            changed_attributes(&base, &task).into_iter().collect();
                        drain.finish_upload(item, &changed, history);
                    }
                    UploadScript::Attributes(attributes, history) => {
                        drain.finish_upload(item, &attributes, history);
                    }
                    UploadScript::Cancel => drain.cancel_upload(item),
                    UploadScript::Reject(message) => {
                        drain.add_problem(item, UploadProblemKind::Rejected, message);
                        drain.cancel_upload(item);
                    }
                    UploadScript::Leave => {}
                }
            }
            Ok(())
        });
        if let Err(err) = written.wait_timeout(WAIT) {
            debug!(error = %err, "scripted write-back failed");
        }
    }
}
