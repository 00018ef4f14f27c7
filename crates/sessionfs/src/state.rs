//! In-flight counter and draining flag for one session.
//!
//! A single atomic word carries both pieces: the low bits count operations
//! currently executing, and [`DRAINING`] marks that teardown has started (or
//! that the session is not yet wired). While the flag is set no new operation
//! is admitted; teardown waits until the word equals exactly `DRAINING`.
//!
//! Waiting uses a condition variable. The last operation to leave a draining
//! session takes the mutex before notifying, so a waiter that checked the
//! word under the mutex cannot miss the wakeup.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Sentinel bit: the session is draining (or not yet open).
pub const DRAINING: u32 = 0x1000_0000;

#[derive(Debug)]
pub struct SessionState {
    word: AtomicU32,
    drained_lock: Mutex<()>,
    drained: Condvar,
}

impl SessionState {
    /// A state that admits nothing until [`SessionState::open`] is called.
    pub fn sealed() -> Self {
        Self {
            word: AtomicU32::new(DRAINING),
            drained_lock: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    /// Clear the draining flag and admit operations.
    ///
    /// Only valid when nothing is in flight: after construction, or after a
    /// drain completed and the commit was rolled back.
    pub fn open(&self) {
        self.word.store(0, Ordering::Release);
    }

    /// Register an operation unless the session is draining.
    pub fn enter(&self) -> Option<OperationGuard<'_>> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if current & DRAINING != 0 {
                return None;
            }
            match self.word.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(OperationGuard { state: self }),
                Err(observed) => current = observed,
            }
        }
    }

    /// Set the draining flag. Returns `false` if it was already set.
    pub fn begin_drain(&self) -> bool {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if current & DRAINING != 0 {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                current | DRAINING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Block until every operation admitted before the drain has exited.
    pub fn wait_drained(&self) {
        let mut guard = self
            .drained_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while self.word.load(Ordering::Acquire) != DRAINING {
            guard = self
                .drained
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_draining(&self) -> bool {
        self.word.load(Ordering::Acquire) & DRAINING != 0
    }

    /// Operations currently executing.
    pub fn in_flight(&self) -> u32 {
        self.word.load(Ordering::Acquire) & !DRAINING
    }

    fn exit(&self) {
        let previous = self.word.fetch_sub(1, Ordering::AcqRel);
        if previous - 1 == DRAINING {
            let _guard = self
                .drained_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.drained.notify_all();
        }
    }
}

/// Scoped registration of one operation; leaving the scope by any path
/// decrements the counter.
#[derive(Debug)]
pub struct OperationGuard<'a> {
    state: &'a SessionState,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.state.exit();
    }
}
