//! Reader/writer coordination.
//!
//! Readers register with a counting gate for the duration of their
//! transaction. Growing the mapped region requires exclusive access to
//! the mapping, so the resize path flips the gate into a draining state:
//! new readers block, and the resizer waits until the active count
//! reaches zero. One mutex guards the count and the resize flag; it is
//! never held across a scan.

use parking_lot::{Condvar, Mutex};

use crate::error::{DbError, DbResult, StoreErrorKind};

#[derive(Debug, Default)]
struct GateState {
    active: usize,
    resizing: bool,
}

/// Counting barrier between read transactions and map growth.
#[derive(Debug)]
pub(crate) struct ReaderGate {
    state: Mutex<GateState>,
    changed: Condvar,
    max_readers: usize,
}

impl ReaderGate {
    pub fn new(max_readers: usize) -> ReaderGate {
        ReaderGate {
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
            max_readers,
        }
    }

    /// Register a reader. Blocks while a resize is draining; fails with
    /// `ReadersFull` when the configured limit is reached.
    pub fn enter(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        while state.resizing {
            self.changed.wait(&mut state);
        }
        if state.active >= self.max_readers {
            return Err(DbError::store("begin_read", StoreErrorKind::ReadersFull));
        }
        state.active += 1;
        Ok(())
    }

    pub fn exit(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.active > 0);
        state.active -= 1;
        if state.active == 0 {
            self.changed.notify_all();
        }
    }

    pub fn active_readers(&self) -> usize {
        self.state.lock().active
    }

    /// Enter the draining state and wait for every active reader to end.
    /// With zero readers this returns immediately.
    pub fn begin_resize(&self) {
        let mut state = self.state.lock();
        state.resizing = true;
        while state.active > 0 {
            self.changed.wait(&mut state);
        }
    }

    pub fn end_resize(&self) {
        let mut state = self.state.lock();
        state.resizing = false;
        self.changed.notify_all();
    }
}

/// Callbacks fired after each successful commit, outside all locks.
#[derive(Default)]
pub(crate) struct CommitHooks {
    hooks: Mutex<Vec<std::sync::Arc<dyn Fn(u64) + Send + Sync>>>,
}

impl CommitHooks {
    pub fn register(&self, hook: std::sync::Arc<dyn Fn(u64) + Send + Sync>) {
        self.hooks.lock().push(hook);
    }

    /// Snapshot under the lock, call outside it: a hook may start a read
    /// transaction or register further hooks.
    pub fn fire(&self, seq: u64) {
        let snapshot = self.hooks.lock().clone();
        for hook in snapshot {
            hook(seq);
        }
    }
}
