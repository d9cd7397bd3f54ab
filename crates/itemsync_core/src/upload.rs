//! Two-phase upload.
//!
//! Prepare runs in a write transaction: every accepted item is upload-locked
//! and its TRUNK snapshot stored as the upload task. The uploader then talks
//! to the server and writes back what the server confirmed through
//! [`UploadProcess::write_upload_state`]. Confirmed values are staged in
//! DONE_UPLOAD and merged like downloaded state, so anything unconfirmed
//! stays a local change.

use crate::branch::trunk_shadowables;
use crate::diff::ItemDiff;
use crate::history;
use crate::manager::ManagerInner;
use crate::schema::{
    self, BASE, CONFLICT, DONE_UPLOAD, DONE_UPLOAD_HISTORY, DOWNLOAD, EXISTING, INVISIBLE,
    UPLOAD_ATTEMPT, UPLOAD_TASK,
};
use bytes::Bytes;
use itemsync_store::{Aborted, Attribute, AttributeMap, DbResult, ItemId, Reader, Value, Writer};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Talks to the server on behalf of the upload pipeline.
pub trait ItemUploader: Send + Sync {
    /// Picks the items to upload. Runs in a write transaction.
    fn prepare(&self, prepare: &mut UploadPrepare<'_>) -> Result<(), Aborted>;

    /// Uploads the prepared items and writes the result back through
    /// [`UploadProcess::write_upload_state`] before returning. Items not
    /// finished by then are cancelled.
    fn do_upload(&self, process: &UploadProcess);
}

/// Why an item was not accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadRefusal {
    /// The item does not exist locally.
    NotExists,
    /// Another upload holds the item.
    AlreadyUploading,
    /// The result of an earlier upload is not merged yet.
    PendingUploadResult,
    /// Downloaded or conflicting server state has to be merged first.
    NeedsMerge,
    /// Nothing to upload.
    NoChanges,
}

impl fmt::Display for UploadRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotExists => "item does not exist",
            Self::AlreadyUploading => "already uploading",
            Self::PendingUploadResult => "previous upload result not merged",
            Self::NeedsMerge => "needs merge",
            Self::NoChanges => "no local changes",
        };
        f.write_str(text)
    }
}

/// Kind of an [`UploadProblem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadProblemKind {
    /// The upload failed, e.g. a network error.
    Failed,
    /// The server refused the change.
    Rejected,
    /// The item got a conflict while uploading.
    Conflict,
}

/// A problem reported by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProblem {
    /// Affected item, `None` for the whole batch.
    pub item: Option<ItemId>,
    /// Problem kind.
    pub kind: UploadProblemKind,
    /// Human-readable description.
    pub message: String,
}

impl UploadProblem {
    /// Creates a problem.
    pub fn new(item: Option<ItemId>, kind: UploadProblemKind, message: impl Into<String>) -> Self {
        Self {
            item,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for UploadProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item {
            Some(item) => write!(f, "{item}: {:?}: {}", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// Result of an upload run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Items with at least one confirmed attribute or history record.
    pub uploaded: Vec<ItemId>,
    /// Items finished with nothing confirmed.
    pub cancelled: Vec<ItemId>,
    /// Reported problems.
    pub problems: Vec<UploadProblem>,
}

impl UploadOutcome {
    /// Returns true if nothing was uploaded, cancelled or reported.
    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty() && self.cancelled.is_empty() && self.problems.is_empty()
    }
}

/// Upload prepare transaction.
pub struct UploadPrepare<'a> {
    writer: &'a mut dyn Writer,
    manager: &'a Arc<ManagerInner>,
    items: Vec<ItemId>,
    previous_attempts: BTreeMap<ItemId, Option<Bytes>>,
}

impl<'a> UploadPrepare<'a> {
    pub(crate) fn new(writer: &'a mut dyn Writer, manager: &'a Arc<ManagerInner>) -> Self {
        Self {
            writer,
            manager,
            items: Vec::new(),
            previous_attempts: BTreeMap::new(),
        }
    }

    /// Transaction reader.
    pub fn reader(&self) -> &dyn Reader {
        self.writer.as_reader()
    }

    /// Locks `item` for upload and returns the TRUNK snapshot to send.
    ///
    /// # Errors
    ///
    /// Returns why the item cannot be uploaded now.
    pub fn try_add_to_upload(&mut self, item: ItemId) -> Result<AttributeMap, UploadRefusal> {
        if self.items.contains(&item) {
            return self
                .writer
                .as_reader()
                .get_map(item, &UPLOAD_TASK)
                .ok_or(UploadRefusal::AlreadyUploading);
        }
        self.check(item)?;
        if !self.manager.uploads.try_lock(item) {
            return Err(UploadRefusal::AlreadyUploading);
        }
        let manager = Arc::clone(self.manager);
        self.writer.finally_do(Box::new(move |committed| {
            if !committed {
                manager.uploads.unlock(&[item]);
            }
        }));
        let task = trunk_shadowables(self.writer.as_reader(), item);
        self.writer
            .set(item, &UPLOAD_TASK, Some(Value::Map(task.clone())));
        self.items.push(item);
        debug!(item = %item, "prepared for upload");
        Ok(task)
    }

    /// Like [`Self::try_add_to_upload`], logging the refusal.
    pub fn add_to_upload(&mut self, item: ItemId) -> Option<AttributeMap> {
        match self.try_add_to_upload(item) {
            Ok(task) => Some(task),
            Err(refusal) => {
                debug!(item = %item, reason = %refusal, "upload refused");
                None
            }
        }
    }

    /// Local changes of `item` relative to BASE.
    pub fn local_changes(&self, item: ItemId) -> ItemDiff {
        let reader = self.writer.as_reader();
        let base = reader
            .get_map(item, &BASE)
            .unwrap_or_else(|| trunk_shadowables(reader, item));
        ItemDiff::local(reader, item, base, false)
    }

    /// Records uploader retry metadata. A cancelled upload restores the
    /// value the item had before this prepare.
    pub fn set_upload_attempt(&mut self, item: ItemId, attempt: Option<Bytes>) {
        let previous = self.upload_attempt(item);
        self.previous_attempts.entry(item).or_insert(previous);
        self.writer
            .set(item, &UPLOAD_ATTEMPT, attempt.map(Value::Bytes));
    }

    /// Current retry metadata of `item`.
    pub fn upload_attempt(&self, item: ItemId) -> Option<Bytes> {
        match self.writer.as_reader().get(item, &UPLOAD_ATTEMPT) {
            Some(Value::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Items accepted so far.
    pub fn prepared(&self) -> &[ItemId] {
        &self.items
    }

    fn check(&mut self, item: ItemId) -> Result<(), UploadRefusal> {
        if !self.writer.as_reader().get_flag(item, &EXISTING) {
            return Err(UploadRefusal::NotExists);
        }
        if self.manager.uploads.is_locked(item) {
            return Err(UploadRefusal::AlreadyUploading);
        }
        if self.writer.as_reader().get(item, &UPLOAD_TASK).is_some() {
            // Left behind by a process that never wrote back.
            warn!(item = %item, "dropping stale upload task");
            self.writer.set(item, &UPLOAD_TASK, None);
        }
        let reader = self.writer.as_reader();
        if reader.get(item, &DONE_UPLOAD).is_some() {
            return Err(UploadRefusal::PendingUploadResult);
        }
        if reader.get(item, &DOWNLOAD).is_some() || reader.get(item, &CONFLICT).is_some() {
            return Err(UploadRefusal::NeedsMerge);
        }
        let has_history = !history::pending_history(reader, item).is_empty();
        let has_changes = reader
            .get_map(item, &BASE)
            .is_some_and(|base| ItemDiff::local(reader, item, base, true).has_changes());
        if !has_changes && !has_history {
            return Err(UploadRefusal::NoChanges);
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> (Vec<ItemId>, BTreeMap<ItemId, Option<Bytes>>) {
        (self.items, self.previous_attempts)
    }
}

#[derive(Default)]
struct ProcessState {
    pending: BTreeSet<ItemId>,
    uploaded: Vec<ItemId>,
    cancelled: Vec<ItemId>,
    problems: Vec<UploadProblem>,
}

struct ProcessShared {
    manager: Arc<ManagerInner>,
    items: Vec<ItemId>,
    attempts: BTreeMap<ItemId, Option<Bytes>>,
    state: Mutex<ProcessState>,
}

impl ProcessShared {
    fn apply(&self, report: UploadReport) {
        let finished: Vec<ItemId> = report
            .uploaded
            .iter()
            .chain(&report.cancelled)
            .copied()
            .collect();
        self.manager.uploads.unlock(&finished);
        let mut state = self.state.lock();
        for item in &finished {
            state.pending.remove(item);
        }
        state.uploaded.extend(report.uploaded);
        state.cancelled.extend(report.cancelled);
        state.problems.extend(report.problems);
    }
}

/// Items finished by one write-back transaction.
#[derive(Default)]
struct UploadReport {
    uploaded: Vec<ItemId>,
    cancelled: Vec<ItemId>,
    problems: Vec<UploadProblem>,
}

/// A prepared batch on its way to the server.
#[derive(Clone)]
pub struct UploadProcess {
    shared: Arc<ProcessShared>,
}

impl UploadProcess {
    pub(crate) fn new(
        manager: Arc<ManagerInner>,
        items: Vec<ItemId>,
        attempts: BTreeMap<ItemId, Option<Bytes>>,
    ) -> Self {
        let state = ProcessState {
            pending: items.iter().copied().collect(),
            ..ProcessState::default()
        };
        Self {
            shared: Arc::new(ProcessShared {
                manager,
                items,
                attempts,
                state: Mutex::new(state),
            }),
        }
    }

    /// Items prepared for this upload.
    pub fn items(&self) -> &[ItemId] {
        &self.shared.items
    }

    /// Items not finished yet.
    pub fn pending(&self) -> Vec<ItemId> {
        self.shared.state.lock().pending.iter().copied().collect()
    }

    /// Writes upload results in a write transaction and merges the
    /// finished items.
    pub fn write_upload_state<F>(&self, body: F) -> DbResult<()>
    where
        F: FnOnce(&mut UploadDrain<'_>) -> Result<(), Aborted> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared.manager.store.write(move |writer| {
            let report = {
                let mut drain = UploadDrain::new(writer, &shared);
                body(&mut drain)?;
                drain.report
            };
            let finished: Vec<ItemId> = report
                .uploaded
                .iter()
                .chain(&report.cancelled)
                .copied()
                .collect();
            shared.manager.merge_in(writer, &finished, None)?;
            let applied = Arc::clone(&shared);
            writer.finally_do(Box::new(move |committed| {
                if committed {
                    applied.apply(report);
                }
            }));
            Ok(())
        })
    }

    /// Cancels `items`, or every pending item for `None`.
    pub fn cancel_upload(&self, items: Option<&[ItemId]>) -> DbResult<()> {
        let selected: Option<Vec<ItemId>> = items.map(<[ItemId]>::to_vec);
        let all = self.shared.items.clone();
        self.write_upload_state(move |drain| {
            for item in selected.unwrap_or(all) {
                drain.cancel_upload(item);
            }
            Ok(())
        })
    }

    /// Reports a problem with the batch or one item.
    pub fn add_problem(&self, problem: UploadProblem) {
        warn!(problem = %problem, "upload problem");
        self.shared.state.lock().problems.push(problem);
    }

    /// Cancels every item not finished yet and waits for the write-back.
    pub fn upload_done(&self) -> UploadOutcome {
        if let Err(err) = self.cancel_upload(None).wait() {
            error!(error = %err, "cannot cancel unfinished upload");
            let pending: Vec<ItemId> = std::mem::take(&mut self.shared.state.lock().pending)
                .into_iter()
                .collect();
            self.shared.manager.uploads.unlock(&pending);
            let mut state = self.shared.state.lock();
            state.problems.push(UploadProblem::new(
                None,
                UploadProblemKind::Failed,
                format!("cancel failed: {err}"),
            ));
            state.cancelled.extend(pending);
        }
        self.outcome()
    }

    /// Results collected so far.
    pub fn outcome(&self) -> UploadOutcome {
        let state = self.shared.state.lock();
        UploadOutcome {
            uploaded: state.uploaded.clone(),
            cancelled: state.cancelled.clone(),
            problems: state.problems.clone(),
        }
    }
}

impl fmt::Debug for UploadProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadProcess")
            .field("items", &self.shared.items)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Write-back transaction of an upload.
pub struct UploadDrain<'a> {
    writer: &'a mut dyn Writer,
    shared: &'a ProcessShared,
    report: UploadReport,
}

impl<'a> UploadDrain<'a> {
    fn new(writer: &'a mut dyn Writer, shared: &'a ProcessShared) -> Self {
        Self {
            writer,
            shared,
            report: UploadReport::default(),
        }
    }

    /// Transaction reader.
    pub fn reader(&self) -> &dyn Reader {
        self.writer.as_reader()
    }

    /// TRUNK snapshot taken at prepare.
    pub fn upload_task(&self, item: ItemId) -> Option<AttributeMap> {
        self.writer.as_reader().get_map(item, &UPLOAD_TASK)
    }

    /// Records that the server confirmed `attributes` with the values of
    /// the upload task, plus the first `history_count` pending history
    /// records. Everything else stays a local change.
    pub fn finish_upload(&mut self, item: ItemId, attributes: &[Attribute], history_count: usize) {
        if !self.shared.items.contains(&item) {
            warn!(item = %item, "finish of item outside the upload");
            return;
        }
        let Some(task) = self.upload_task(item) else {
            debug!(item = %item, "upload already finished");
            return;
        };
        self.writer.set(item, &UPLOAD_TASK, None);
        if attributes.is_empty() && history_count == 0 {
            self.restore_attempt(item);
            self.report.cancelled.push(item);
            debug!(item = %item, "upload cancelled");
            return;
        }
        let reader = self.writer.as_reader();
        if reader.get(item, &CONFLICT).is_some() {
            warn!(item = %item, "conflict while uploading, confirmation ignored");
            self.restore_attempt(item);
            self.report.cancelled.push(item);
            self.report.problems.push(UploadProblem::new(
                Some(item),
                UploadProblemKind::Conflict,
                "item got a conflict while uploading",
            ));
            return;
        }

        let mut confirmed = reader
            .get_map(item, &DONE_UPLOAD)
            .or_else(|| reader.get_map(item, &BASE))
            .unwrap_or_else(|| task.clone());
        let created = schema::is_invisible(&confirmed) && !schema::is_invisible(&task);
        for attribute in attributes {
            confirmed.set(attribute, task.get(attribute).cloned());
        }
        if created && !attributes.is_empty() {
            // The server has the item now.
            confirmed.set(&INVISIBLE, None);
        }

        let pending = history::pending_history(reader, item).len();
        let done = history::done_history_count(reader, item) + history_count.min(pending);
        self.writer
            .set(item, &DONE_UPLOAD, Some(Value::Map(confirmed)));
        if done > 0 {
            let done = i64::try_from(done).unwrap_or(i64::MAX);
            self.writer
                .set(item, &DONE_UPLOAD_HISTORY, Some(Value::Int(done)));
        }
        info!(
            item = %item,
            attributes = attributes.len(),
            history = history_count.min(pending),
            "upload confirmed"
        );
        self.report.uploaded.push(item);
    }

    /// Finishes `item` with nothing confirmed.
    pub fn cancel_upload(&mut self, item: ItemId) {
        self.finish_upload(item, &[], 0);
    }

    /// Writes a direct attribute, e.g. a server id assigned on upload.
    ///
    /// # Panics
    ///
    /// Panics if the attribute is shadowable.
    pub fn write_direct(&mut self, item: ItemId, attribute: &Attribute, value: Option<Value>) {
        assert!(
            !attribute.is_shadowable(),
            "upload write to shadowable attribute {attribute}"
        );
        self.writer.set(item, attribute, value);
    }

    /// Reports a problem with one item. The problem is kept only if the
    /// transaction commits.
    pub fn add_problem(&mut self, item: ItemId, kind: UploadProblemKind, message: impl Into<String>) {
        let problem = UploadProblem::new(Some(item), kind, message);
        warn!(problem = %problem, "upload problem");
        self.report.problems.push(problem);
    }

    fn restore_attempt(&mut self, item: ItemId) {
        if let Some(previous) = self.shared.attempts.get(&item) {
            self.writer
                .set(item, &UPLOAD_ATTEMPT, previous.clone().map(Value::Bytes));
        }
    }
}
