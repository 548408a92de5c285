use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide "a job is in flight" flag.
///
/// Shared behind an `Arc`; the reconciler is the only writer, observers may
/// read it without taking the reconciler lock.
#[derive(Debug, Default)]
pub struct FlightGuard {
    held: AtomicBool,
}

impl FlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the guard. Returns false if it is already held.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the guard. Returns whether it was held; releasing twice is a no-op.
    pub fn release(&self) -> bool {
        self.held.swap(false, Ordering::AcqRel)
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}
