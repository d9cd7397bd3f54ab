//! Thread gates: where callbacks are delivered.

use parking_lot::Mutex;
use crate::error::StoreError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{error, warn};

type Job = Box<dyn FnOnce() + Send>;

struct Confined {
    jobs: Mutex<Option<Sender<Job>>>,
    thread: ThreadId,
    name: String,
}

/// Execution context for result delivery.
///
/// `Straight` runs jobs on the calling thread. `Confined` runs them, in
/// submission order, on one dedicated thread; this is the "UI" context that
/// lock bookkeeping and cache application are confined to.
#[derive(Clone)]
pub enum Gate {
    /// Run on the calling thread.
    Straight,
    /// Run on a dedicated thread.
    Confined(ConfinedGate),
}

/// Handle to a dedicated gate thread.
#[derive(Clone)]
pub struct ConfinedGate {
    inner: Arc<Confined>,
}

impl Gate {
    /// Spawns a dedicated gate thread.
    pub fn spawn(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();
        let thread_name = name.clone();
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Ok(job) = rx.recv() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    let err = StoreError::from_panic(payload.as_ref());
                    error!(gate = %thread_name, error = %err, "gate job panicked");
                }
            }
        });
        match spawned {
            Ok(handle) => Gate::Confined(ConfinedGate {
                inner: Arc::new(Confined {
                    jobs: Mutex::new(Some(tx)),
                    thread: handle.thread().id(),
                    name,
                }),
            }),
            Err(err) => {
                warn!(gate = %name, error = %err, "cannot spawn gate thread, running jobs inline");
                Gate::Straight
            }
        }
    }

    /// Submits a job.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            Gate::Straight => job(),
            Gate::Confined(gate) => {
                let jobs = gate.inner.jobs.lock();
                let sent = match jobs.as_ref() {
                    Some(tx) => tx.send(Box::new(job)).is_ok(),
                    None => false,
                };
                if !sent {
                    warn!(gate = %gate.inner.name, "gate is shut down, job dropped");
                }
            }
        }
    }

    /// Returns true if the calling thread is the gate's thread.
    pub fn is_current(&self) -> bool {
        match self {
            Gate::Straight => true,
            Gate::Confined(gate) => thread::current().id() == gate.inner.thread,
        }
    }

    /// Blocks until every job submitted before this call has run.
    pub fn flush(&self) {
        if self.is_current() {
            return;
        }
        let (tx, rx) = mpsc::channel();
        self.execute(move || {
            let _ = tx.send(());
        });
        let _ = rx.recv();
    }

    /// Stops accepting jobs; the thread exits after draining its queue.
    pub fn shutdown(&self) {
        if let Gate::Confined(gate) = self {
            gate.inner.jobs.lock().take();
        }
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Straight => f.write_str("Gate::Straight"),
            Gate::Confined(gate) => write!(f, "Gate::Confined({})", gate.inner.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confined_jobs_run_in_order_on_one_thread() {
        let gate = Gate::spawn("test-gate");
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            let g = gate.clone();
            gate.execute(move || tx.send((i, g.is_current())).unwrap());
        }
        gate.flush();
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received, (0..5).map(|i| (i, true)).collect::<Vec<_>>());
        assert!(!gate.is_current());
    }

    #[test]
    fn straight_runs_inline() {
        let mut ran = false;
        let (tx, rx) = mpsc::channel();
        Gate::Straight.execute(move || tx.send(()).unwrap());
        if rx.try_recv().is_ok() {
            ran = true;
        }
        assert!(ran);
    }

    #[test]
    fn panicking_job_does_not_stop_the_gate() {
        let gate = Gate::spawn("test-gate-panic");
        gate.execute(|| panic!("job failed"));
        let (tx, rx) = mpsc::channel();
        gate.execute(move || tx.send(()).unwrap());
        gate.flush();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn shut_down_gate_drops_jobs() {
        let gate = Gate::spawn("test-gate-shutdown");
        gate.shutdown();
        let (tx, rx) = mpsc::channel::<()>();
        gate.execute(move || tx.send(()).unwrap());
        assert!(rx.recv().is_err());
    }
}
