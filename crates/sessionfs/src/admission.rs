//! Admission control: an engine-wide ceiling on active sessions.
//!
//! The counter is managed with a compare-and-swap loop, so admission never
//! takes a lock. A check that observes the ceiling fails without mutating the
//! counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct Admission {
    active: AtomicUsize,
    capacity: usize,
}

impl Admission {
    /// A controller admitting at most `capacity` sessions, none active yet.
    pub fn new(capacity: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Take one slot if the ceiling has not been reached.
    pub fn try_admit(&self) -> bool {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return false;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Give back a slot taken by [`Admission::try_admit`].
    ///
    /// Saturates at zero so an unbalanced call can never wrap the counter.
    pub fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Sessions currently admitted.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// The admission ceiling.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit and wrap the slot in a permit that releases it on drop.
    pub fn try_permit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        if self.try_admit() {
            Some(AdmissionPermit {
                admission: Arc::clone(self),
            })
        } else {
            None
        }
    }
}

/// One admitted slot. Dropping it calls [`Admission::release`] exactly once.
#[derive(Debug)]
pub struct AdmissionPermit {
    admission: Arc<Admission>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.admission.release();
    }
}
