//! Lifespans: owners of registrations that end together.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type EndAction = Box<dyn FnOnce() + Send>;

struct Inner {
    ended: AtomicBool,
    actions: Mutex<Vec<EndAction>>,
}

/// A scope that runs registered actions once, when it ends.
///
/// Listener registrations, cache slices and similar resources attach
/// themselves to a lifespan and detach when it ends. Clones share the scope.
#[derive(Clone)]
pub struct Lifespan {
    inner: Arc<Inner>,
}

impl Lifespan {
    /// Creates a live lifespan.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                ended: AtomicBool::new(false),
                actions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a lifespan that ends when `self` ends, or earlier.
    pub fn child(&self) -> Self {
        let child = Self::new();
        let ending = child.clone();
        self.add(move || ending.end());
        child
    }

    /// Returns true once ended.
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// Registers an action. If the lifespan already ended, runs it now.
    pub fn add(&self, action: impl FnOnce() + Send + 'static) {
        {
            let mut actions = self.inner.actions.lock();
            if !self.is_ended() {
                actions.push(Box::new(action));
                return;
            }
        }
        action();
    }

    /// Ends the lifespan, running registered actions in reverse order.
    /// Ending twice is a no-op.
    pub fn end(&self) {
        let actions = {
            let mut actions = self.inner.actions.lock();
            if self.inner.ended.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *actions)
        };
        for action in actions.into_iter().rev() {
            action();
        }
    }
}

impl fmt::Debug for Lifespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifespan")
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn actions_run_once_on_end() {
        let life = Lifespan::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        life.add(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        life.end();
        life.end();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(life.is_ended());
    }

    #[test]
    fn add_after_end_runs_immediately() {
        let life = Lifespan::new();
        life.end();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        life.add(move || r.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn child_ends_with_parent() {
        let parent = Lifespan::new();
        let child = parent.child();
        assert!(!child.is_ended());
        parent.end();
        assert!(child.is_ended());
    }
}
