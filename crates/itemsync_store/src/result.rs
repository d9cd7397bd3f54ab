//! Pending transaction results.

use crate::error::{StoreError, StoreResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

type Callback<T> = Box<dyn FnOnce(StoreResult<T>) + Send>;

enum SlotState<T> {
    Pending(Option<Callback<T>>),
    Done(Option<StoreResult<T>>),
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

/// Handle to the result of a transaction running on a store thread.
///
/// The result is consumed exactly once, either by [`DbResult::wait`] or by
/// a callback registered with [`DbResult::on_done`].
pub struct DbResult<T> {
    slot: Arc<Slot<T>>,
}

/// Completes a [`DbResult`]. Dropping it uncompleted reports
/// [`StoreError::Closed`].
pub(crate) struct Completer<T: Send + 'static> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T: Send + 'static> DbResult<T> {
    pub(crate) fn pending() -> (Self, Completer<T>) {
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState::Pending(None)),
            ready: Condvar::new(),
        });
        (
            Self {
                slot: Arc::clone(&slot),
            },
            Completer { slot: Some(slot) },
        )
    }

    /// Creates an already finished result.
    pub fn completed(result: StoreResult<T>) -> Self {
        Self {
            slot: Arc::new(Slot {
                state: Mutex::new(SlotState::Done(Some(result))),
                ready: Condvar::new(),
            }),
        }
    }

    /// Returns true once the transaction finished.
    pub fn is_done(&self) -> bool {
        matches!(*self.slot.state.lock(), SlotState::Done(_))
    }

    /// Blocks until the transaction finished and returns its result.
    pub fn wait(self) -> StoreResult<T> {
        let mut state = self.slot.state.lock();
        loop {
            if let SlotState::Done(result) = &mut *state {
                return result.take().unwrap_or(Err(StoreError::Closed));
            }
            self.slot.ready.wait(&mut state);
        }
    }

    /// Blocks for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> StoreResult<T> {
        let mut state = self.slot.state.lock();
        loop {
            if let SlotState::Done(result) = &mut *state {
                return result.take().unwrap_or(Err(StoreError::Closed));
            }
            if self.slot.ready.wait_for(&mut state, timeout).timed_out() {
                return Err(StoreError::Timeout);
            }
        }
    }

    /// Delivers the result to `callback` on the thread that finishes the
    /// transaction, or immediately if it already finished.
    pub fn on_done(self, callback: impl FnOnce(StoreResult<T>) + Send + 'static) {
        let mut state = self.slot.state.lock();
        match &mut *state {
            SlotState::Done(result) => {
                let result = result.take().unwrap_or(Err(StoreError::Closed));
                drop(state);
                callback(result);
            }
            SlotState::Pending(slot) => *slot = Some(Box::new(callback)),
        }
    }
}

impl<T: Send + 'static> Completer<T> {
    pub(crate) fn complete(mut self, result: StoreResult<T>) {
        if let Some(slot) = self.slot.take() {
            Self::deliver(&slot, result);
        }
    }

    fn deliver(slot: &Slot<T>, result: StoreResult<T>) {
        let mut state = slot.state.lock();
        let callback = match &mut *state {
            SlotState::Pending(callback) => callback.take(),
            SlotState::Done(_) => return,
        };
        match callback {
            Some(callback) => {
                *state = SlotState::Done(None);
                drop(state);
                callback(result);
            }
            None => {
                *state = SlotState::Done(Some(result));
                slot.ready.notify_all();
            }
        }
    }
}

impl<T: Send + 'static> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            Self::deliver(&slot, Err(StoreError::Closed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn wait_receives_value_from_other_thread() {
        let (result, completer) = DbResult::<u32>::pending();
        std::thread::spawn(move || completer.complete(Ok(7)));
        assert_eq!(result.wait(), Ok(7));
    }

    #[test]
    fn callback_runs_when_completed() {
        let (result, completer) = DbResult::<u32>::pending();
        let (tx, rx) = mpsc::channel();
        result.on_done(move |r| tx.send(r).unwrap());
        completer.complete(Ok(3));
        assert_eq!(rx.recv().unwrap(), Ok(3));
    }

    #[test]
    fn callback_on_finished_result_runs_inline() {
        let (tx, rx) = mpsc::channel();
        DbResult::completed(Ok("done")).on_done(move |r| tx.send(r).unwrap());
        assert_eq!(rx.try_recv().unwrap(), Ok("done"));
    }

    #[test]
    fn dropped_completer_reports_closed() {
        let (result, completer) = DbResult::<u32>::pending();
        drop(completer);
        assert!(result.is_done());
        assert_eq!(result.wait(), Err(StoreError::Closed));
    }

    #[test]
    fn wait_timeout_expires() {
        let (result, _completer) = DbResult::<u32>::pending();
        assert_eq!(
            result.wait_timeout(Duration::from_millis(10)),
            Err(StoreError::Timeout)
        );
    }
}
