use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Holds a single-flight flag for the lifetime of one operation.
///
/// The guard owns its flag so it can move into the task that runs the
/// operation; the flag clears when that task finishes.
pub(crate) struct FlightGuard {
    flag: Arc<AtomicBool>,
}

impl FlightGuard {
    /// Raises `flag`, or returns `None` if it is already raised.
    pub(crate) fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
