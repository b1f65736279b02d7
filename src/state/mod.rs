// State management module
//
// Every engine keeps its slice of state in a StateManager: an Arc<RwLock<S>>
// plus a broadcast channel carrying the changes detected on each update.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// State that can describe what changed between two of its values.
pub trait TrackChanges: Clone + Send + Sync + 'static {
    type Change: Clone + Debug + Send + 'static;

    /// Compare two states and list the changes, in a stable order.
    fn detect_changes(old: &Self, new: &Self) -> Vec<Self::Change>;
}

/// Thread-safe state holder with change broadcasting
///
/// - [`snapshot()`](Self::snapshot) clones the whole state
/// - [`read()`](Self::read) borrows it for a closure
/// - [`update()`](Self::update) mutates it and broadcasts the detected changes
/// - [`subscribe()`](Self::subscribe) listens for those changes
///
/// Closures run under the lock; they must not call back into the same manager.
pub struct StateManager<S: TrackChanges> {
    state: Arc<RwLock<S>>,
    change_tx: broadcast::Sender<S::Change>,
}

impl<S: TrackChanges> StateManager<S> {
    /// `capacity` is the broadcast buffer; zero is bumped to one.
    pub fn new(initial: S, capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(initial)),
            change_tx,
        }
    }

    pub fn snapshot(&self) -> S {
        self.read_guard().clone()
    }

    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&S) -> R,
    {
        f(&self.read_guard())
    }

    /// Apply `update_fn`, then emit and return the detected changes.
    pub fn update<F>(&self, update_fn: F) -> Vec<S::Change>
    where
        F: FnOnce(&mut S),
    {
        self.update_with(update_fn).1
    }

    /// Like [`update`](Self::update), also returning the closure's value.
    pub fn update_with<F, R>(&self, update_fn: F) -> (R, Vec<S::Change>)
    where
        F: FnOnce(&mut S) -> R,
    {
        let changes;
        let value;
        {
            let mut state = self.write_guard();
            let old_state = state.clone();
            value = update_fn(&mut state);
            changes = S::detect_changes(&old_state, &state);
        }

        for change in &changes {
            // No subscribers is fine
            let _ = self.change_tx.send(change.clone());
        }

        (value, changes)
    }

    /// Swap in `new_state` wholesale.
    pub fn replace(&self, new_state: S) -> Vec<S::Change> {
        self.update(|state| *state = new_state)
    }

    /// Broadcast a change that is not a state difference (e.g. a discarded response).
    pub fn emit(&self, change: S::Change) {
        let _ = self.change_tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<S::Change> {
        self.change_tx.subscribe()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, S> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, S> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: TrackChanges> Clone for StateManager<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            change_tx: self.change_tx.clone(),
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
