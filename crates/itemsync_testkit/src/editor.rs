//! A scripted editor factory.
//!
//! Every editor callback is reported as an [`EditorEvent`] on one channel,
//! so tests can wait for the step they need.

use itemsync_core::{EditPrepare, EditorFactory, ItemEditor};
use itemsync_store::{Aborted, AttributeMap, ItemId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Something an editor or its factory was told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// The factory ran for these items.
    Prepared(Vec<ItemId>),
    /// The editor was shown.
    Shown,
    /// The edit lock is gone.
    Released,
    /// Another commit changed locked items.
    ItemsChanged(BTreeMap<ItemId, AttributeMap>),
    /// The edit ended before an editor was shown.
    Cancelled,
}

/// What [`TestEditorFactory::prepare_edit`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Open,
    Decline,
    Abort,
}

/// Editor factory reporting every callback on a channel.
pub struct TestEditorFactory {
    behavior: Behavior,
    extra_items: Vec<ItemId>,
    alive: Arc<AtomicBool>,
    events: Sender<EditorEvent>,
    received: Mutex<Receiver<EditorEvent>>,
}

impl TestEditorFactory {
    /// A factory that opens an editor.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_behavior(Behavior::Open, Vec::new()))
    }

    /// A factory that opens an editor after locking `items` as well.
    pub fn including(items: Vec<ItemId>) -> Arc<Self> {
        Arc::new(Self::with_behavior(Behavior::Open, items))
    }

    /// A factory that returns no editor.
    pub fn declining() -> Arc<Self> {
        Arc::new(Self::with_behavior(Behavior::Decline, Vec::new()))
    }

    /// A factory whose read transaction aborts.
    pub fn aborting() -> Arc<Self> {
        Arc::new(Self::with_behavior(Behavior::Abort, Vec::new()))
    }

    fn with_behavior(behavior: Behavior, extra_items: Vec<ItemId>) -> Self {
        let (events, received) = mpsc::channel();
        Self {
            behavior,
            extra_items,
            alive: Arc::new(AtomicBool::new(true)),
            events,
            received: Mutex::new(received),
        }
    }

    /// Makes every editor of this factory report itself dead.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Waits for the next event.
    pub fn next_event(&self, timeout: Duration) -> Option<EditorEvent> {
        self.received.lock().recv_timeout(timeout).ok()
    }

    /// Waits until `event` arrives, skipping others.
    pub fn wait_for(&self, event: &EditorEvent, timeout: Duration) -> bool {
        let received = self.received.lock();
        loop {
            match received.recv_timeout(timeout) {
                Ok(next) if next == *event => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    }

    /// Waits for the next items-changed notification.
    pub fn wait_items_changed(&self, timeout: Duration) -> Option<BTreeMap<ItemId, AttributeMap>> {
        let received = self.received.lock();
        loop {
            match received.recv_timeout(timeout) {
                Ok(EditorEvent::ItemsChanged(changes)) => return Some(changes),
                Ok(_) => {}
                Err(_) => return None,
            }
        }
    }
}

impl EditorFactory for TestEditorFactory {
    fn prepare_edit(
        &self,
        prepare: &mut EditPrepare<'_>,
    ) -> Result<Option<Arc<dyn ItemEditor>>, Aborted> {
        if !self.extra_items.is_empty() && !prepare.add_items(&self.extra_items) {
            return Ok(None);
        }
        let _ = self.events.send(EditorEvent::Prepared(prepare.items()));
        match self.behavior {
            Behavior::Open => Ok(Some(Arc::new(TestEditor {
                alive: Arc::clone(&self.alive),
                events: self.events.clone(),
            }))),
            Behavior::Decline => Ok(None),
            Behavior::Abort => Err(Aborted::new("editor factory aborted")),
        }
    }

    fn edit_cancelled(&self) {
        let _ = self.events.send(EditorEvent::Cancelled);
    }
}

/// Editor built by [`TestEditorFactory`].
pub struct TestEditor {
    alive: Arc<AtomicBool>,
    events: Sender<EditorEvent>,
}

impl ItemEditor for TestEditor {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn show_editor(&self) -> Result<(), itemsync_core::SyncError> {
        let _ = self.events.send(EditorEvent::Shown);
        Ok(())
    }

    fn on_edit_released(&self) {
        let _ = self.events.send(EditorEvent::Released);
    }

    fn on_items_changed(&self, changes: &BTreeMap<ItemId, AttributeMap>) {
        let _ = self.events.send(EditorEvent::ItemsChanged(changes.clone()));
    }
}
