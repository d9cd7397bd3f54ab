//! In-memory transactional attribute store.

use crate::config::StoreConfig;
use crate::error::{Aborted, StoreError, StoreResult};
use crate::lifespan::Lifespan;
use crate::listener::{DbEvent, DbListener, ListenerRegistry};
use crate::result::DbResult;
use crate::transaction::{Commit, ReadTxn, Reader, Snapshot, WriteTxn, Writer};
use crate::types::Icn;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send>;

struct StoreInner {
    config: StoreConfig,
    current: RwLock<Arc<Snapshot>>,
    /// Only one writer at a time.
    write_lock: Mutex<()>,
    jobs: Mutex<Option<Sender<Job>>>,
    listeners: ListenerRegistry,
    reader_seq: AtomicU64,
}

/// A transactional key-attribute-value store kept in memory.
///
/// The store provides:
/// - Snapshot reads: a reader sees one committed state throughout
/// - Single-writer commits, each assigned the next ICN
/// - Background execution: [`Store::read`] runs on a fresh reader thread,
///   [`Store::write`] on the single writer thread; both return a
///   [`DbResult`] instead of blocking
/// - Commit notifications in ICN order
///
/// Cloning a store yields another handle to the same data.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Creates an empty store with default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an empty store.
    pub fn with_config(config: StoreConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let writer_name = config.writer_thread_name.clone();
        let inner = Arc::new(StoreInner {
            config,
            current: RwLock::new(Arc::new(Snapshot::default())),
            write_lock: Mutex::new(()),
            jobs: Mutex::new(Some(tx)),
            listeners: ListenerRegistry::default(),
            reader_seq: AtomicU64::new(1),
        });
        let spawned = thread::Builder::new().name(writer_name).spawn(move || {
            while let Ok(job) = rx.recv() {
                job();
            }
        });
        if let Err(err) = spawned {
            error!(error = %err, "cannot spawn store writer thread");
            inner.jobs.lock().take();
        }
        Self { inner }
    }

    /// ICN of the last committed transaction.
    pub fn icn(&self) -> Icn {
        self.inner.current.read().icn
    }

    /// Runs `body` in a read transaction on a background thread.
    pub fn read<T, F>(&self, body: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Reader) -> Result<T, Aborted> + Send + 'static,
    {
        let (result, completer) = DbResult::pending();
        let store = self.clone();
        let n = self.inner.reader_seq.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-{n}", self.inner.config.reader_thread_prefix);
        let spawned = thread::Builder::new().name(name).spawn(move || {
            let outcome = store.guarded(|| store.read_now(body));
            completer.complete(outcome);
        });
        if let Err(err) = spawned {
            error!(error = %err, "cannot spawn store reader thread");
        }
        result
    }

    /// Runs `body` in a read transaction on the calling thread.
    pub fn read_now<T>(
        &self,
        body: impl FnOnce(&dyn Reader) -> Result<T, Aborted>,
    ) -> StoreResult<T> {
        let snapshot = Arc::clone(&self.inner.current.read());
        body(&ReadTxn::new(snapshot)).map_err(StoreError::from)
    }

    /// Queues `body` as a write transaction on the writer thread.
    pub fn write<T, F>(&self, body: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Writer) -> Result<T, Aborted> + Send + 'static,
    {
        let (result, completer) = DbResult::pending();
        let store = self.clone();
        let job: Job = Box::new(move || {
            let outcome = store.guarded(|| store.write_now(body));
            completer.complete(outcome);
        });
        let jobs = self.inner.jobs.lock();
        match jobs.as_ref() {
            Some(tx) => {
                // A failed send drops the job and with it the completer,
                // which reports the store as closed.
                let _ = tx.send(job);
            }
            None => drop(job),
        }
        result
    }

    /// Runs `body` as a write transaction on the calling thread, waiting
    /// for any running writer first.
    ///
    /// Must not be called from a commit listener or from inside another
    /// write transaction body.
    pub fn write_now<T>(
        &self,
        body: impl FnOnce(&mut dyn Writer) -> Result<T, Aborted>,
    ) -> StoreResult<T> {
        let guard = self.inner.write_lock.lock();
        let base = Arc::clone(&self.inner.current.read());
        let mut txn = WriteTxn::new(base);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut txn)));
        match outcome {
            Ok(Ok(value)) => {
                let Commit {
                    snapshot,
                    changed,
                    finally,
                } = txn.into_commit();
                let snapshot = Arc::new(snapshot);
                *self.inner.current.write() = Arc::clone(&snapshot);
                if !changed.is_empty() {
                    let event = DbEvent {
                        icn: snapshot.icn,
                        changed,
                    };
                    debug!(icn = %event.icn, items = event.changed.len(), "committed");
                    self.inner
                        .listeners
                        .dispatch(&event, &ReadTxn::new(snapshot));
                }
                drop(guard);
                run_finally(finally, true);
                Ok(value)
            }
            Ok(Err(aborted)) => {
                drop(guard);
                debug!(reason = aborted.reason(), "write transaction aborted");
                run_finally(txn.rollback(), false);
                Err(aborted.into())
            }
            Err(payload) => {
                drop(guard);
                run_finally(txn.rollback(), false);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Adds a commit listener for the duration of `life`.
    pub fn add_listener(&self, life: &Lifespan, listener: Arc<dyn DbListener>) {
        if life.is_ended() {
            return;
        }
        let id = self.inner.listeners.add(listener);
        let inner: Weak<StoreInner> = Arc::downgrade(&self.inner);
        life.add(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.remove(id);
            }
        });
    }

    /// Subscribes to commit events over a channel.
    pub fn subscribe(&self) -> Receiver<DbEvent> {
        self.inner.listeners.subscribe()
    }

    /// Number of registered commit listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Stops accepting background writes. Queued writes still run.
    pub fn close(&self) {
        self.inner.jobs.lock().take();
    }

    fn guarded<T>(&self, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        if !self.inner.config.catch_panics {
            return f();
        }
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                let err = StoreError::from_panic(payload.as_ref());
                error!(error = %err, "transaction body panicked");
                Err(err)
            }
        }
    }
}

fn run_finally(actions: Vec<Box<dyn FnOnce(bool) + Send>>, committed: bool) {
    for action in actions {
        action(committed);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("icn", &self.icn()).finish()
    }
}
