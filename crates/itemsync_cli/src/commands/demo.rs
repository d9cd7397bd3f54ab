//! Demo command implementation.
//!
//! Plays one issue through a download, a local edit, a disjoint and a
//! colliding server change, a manual resolution and an upload, printing
//! sync states and cache events along the way.

use itemsync_cache::{AttributeLoader, DbImage, ImageSliceEvent};
use itemsync_core::schema::BASE;
use itemsync_core::{
    changed_attributes, DownloadDrain, Drain, EditCommit, EditDrain, ItemUploader, MergeEvent,
    Readable, SyncManager, SyncState, UploadPrepare, UploadProcess, Writable,
};
use itemsync_store::{
    Aborted, Attribute, Gate, ItemId, Lifespan, Query, Store, Value, ValueKind,
};
use std::error::Error;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const WAIT: Duration = Duration::from_secs(5);

type DemoResult<T> = Result<T, Box<dyn Error>>;

/// Runs the demo command.
pub fn run() -> DemoResult<()> {
    let summary = Attribute::shadowable("issue.summary", ValueKind::Text);
    let priority = Attribute::shadowable("issue.priority", ValueKind::Int);
    let store = Store::new();
    let manager = SyncManager::new(store.clone(), Gate::Straight);
    let image = DbImage::new(store.clone(), Gate::Straight);
    let life = Lifespan::new();

    manager.add_listener(
        &life,
        Arc::new(|event: &MergeEvent| {
            for (item, state) in &event.items {
                println!("  merged {item} at icn {}: {state}", event.icn);
            }
        }),
    );
    let summaries = image.register_loader(Arc::new(AttributeLoader::new(&summary)));
    image.start()?;
    let slice = image.query_slice(Query::has(&summary), &[summaries])?;
    slice.add_listener(
        &life,
        Arc::new(move |event: &ImageSliceEvent| {
            println!(
                "  cache icn {}: added {:?} changed {:?} removed {:?}",
                event.icn, event.added, event.changed, event.removed
            );
        }),
    );

    println!("Download issue");
    let item = download_new(
        &manager,
        vec![
            (summary.clone(), Value::from("Crash on start")),
            (priority.clone(), Value::Int(2)),
        ],
    )?;
    settle(&image);
    report(&manager, item)?;

    println!("Edit summary locally");
    commit(&manager, item, summary.clone(), Value::from("Crash on startup"))?;
    settle(&image);
    report(&manager, item)?;

    println!("Server raises priority");
    download_change(&manager, item, priority.clone(), Value::Int(1))?;
    settle(&image);
    report(&manager, item)?;

    println!("Server rewrites summary");
    download_change(&manager, item, summary.clone(), Value::from("Crash when starting"))?;
    settle(&image);
    report(&manager, item)?;

    println!("Resolve by keeping the local summary");
    let (done, finished) = mpsc::channel();
    let resolve = Reported::new(
        move |drain: &mut EditDrain<'_>| {
            drain.mark_merged(item);
            Ok(())
        },
        done,
    );
    if !manager.commit_edit(&[item], resolve) || !finished.recv_timeout(WAIT)? {
        return Err("resolution was not committed".into());
    }
    report(&manager, item)?;

    println!("Upload");
    let outcome = manager.sync_upload(Arc::new(DemoUploader { item }))?;
    println!(
        "  uploaded {:?} cancelled {:?} problems {}",
        outcome.uploaded,
        outcome.cancelled,
        outcome.problems.len()
    );
    settle(&image);
    report(&manager, item)?;

    life.end();
    image.stop();
    Ok(())
}

fn download_new(manager: &SyncManager, values: Vec<(Attribute, Value)>) -> DemoResult<ItemId> {
    let (tx, rx) = mpsc::channel();
    manager
        .download(move |drain: &mut DownloadDrain<'_>| {
            let mut creator = drain.create_item();
            for (attribute, value) in &values {
                creator.set_value(attribute, Some(value.clone()));
            }
            let _ = tx.send(creator.item());
            Ok(())
        })
        .wait()?;
    Ok(rx.recv_timeout(WAIT)?)
}

fn download_change(
    manager: &SyncManager,
    item: ItemId,
    attribute: Attribute,
    value: Value,
) -> DemoResult<()> {
    manager
        .download(move |drain: &mut DownloadDrain<'_>| {
            drain
                .change_item(item)
                .set_value(&attribute, Some(value.clone()));
            Ok(())
        })
        .wait()?;
    Ok(())
}

fn commit(manager: &SyncManager, item: ItemId, attribute: Attribute, value: Value) -> DemoResult<()> {
    let (done, finished) = mpsc::channel();
    let edit = Reported::new(
        move |drain: &mut EditDrain<'_>| {
            drain
                .change_item(item)
                .set_value(&attribute, Some(value.clone()));
            Ok(())
        },
        done,
    );
    if !manager.commit_edit(&[item], edit) {
        return Err(format!("{item} is locked").into());
    }
    if !finished.recv_timeout(WAIT)? {
        return Err("edit was not committed".into());
    }
    Ok(())
}

fn settle(image: &DbImage) {
    if !image.wait_idle(WAIT) {
        debug!("cache still updating");
    }
}

fn report(manager: &SyncManager, item: ItemId) -> DemoResult<()> {
    let state: SyncState = manager.sync_state(item)?;
    println!("  {item}: {state}");
    Ok(())
}

/// Forwards the commit outcome.
struct Reported<F> {
    commit: F,
    done: Sender<bool>,
}

impl<F> Reported<F> {
    fn new(commit: F, done: Sender<bool>) -> Self {
        Self { commit, done }
    }
}

impl<F> EditCommit for Reported<F>
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

/// Accepts every local change of one item.
struct DemoUploader {
    item: ItemId,
}

impl ItemUploader for DemoUploader {
    fn prepare(&self, prepare: &mut UploadPrepare<'_>) -> Result<(), Aborted> {
        if let Err(refusal) = prepare.try_add_to_upload(self.item) {
            println!("  {} refused: {refusal:?}", self.item);
        }
        Ok(())
    }

    fn do_upload(&self, process: &UploadProcess) {
        let items = process.items().to_vec();
        let written = process.write_upload_state(move |drain| {
            for item in items {
                let Some(task) = drain.upload_task(item) else {
                    continue;
                };
                let base = drain.reader().get_map(item, &BASE).unwrap_or_default();
                let changed: Vec<Attribute> = changed_attributes(&base, &task).into_iter().collect();
                drain.finish_upload(item, &changed, 0);
            }
            Ok(())
        });
        if let Err(err) = written.wait_timeout(WAIT) {
            println!("  write-back failed: {err}");
        }
    }
}
