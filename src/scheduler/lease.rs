//! Single-active-scheduler mutual exclusion.
//!
//! Only one tick may evaluate scheduler state at a time. The lease is a
//! non-blocking try-acquire: a contender that loses simply skips its
//! tick rather than queueing, since the winning tick already observes
//! the freshest state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to the tick mutual-exclusion flag.
#[derive(Clone, Default)]
pub struct SchedulerLease {
    held: Arc<AtomicBool>,
}

impl SchedulerLease {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lease without blocking.
    ///
    /// Returns `None` when another holder is active; the caller should
    /// skip its tick.
    #[must_use]
    pub fn try_acquire(&self) -> Option<LeaseGuard> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(LeaseGuard {
                held: self.held.clone(),
            })
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the lease on drop.
pub struct LeaseGuard {
    held: Arc<AtomicBool>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
