//! Deferred cancellation flag
//!
//! Cancellation is advisory: blocking calls only look at the flag when they
//! are interrupted while parked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-thread cancellation request
#[derive(Debug, Default)]
pub struct CancelFlag {
    requested: AtomicBool,
}

thread_local! {
    static CURRENT: Arc<CancelFlag> = Arc::new(CancelFlag::new());
}

impl CancelFlag {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Flag of the calling thread
    ///
    /// Other threads cancel this one by calling [`CancelFlag::request`] on a
    /// clone of the returned handle.
    pub fn current() -> Arc<CancelFlag> {
        CURRENT.with(Arc::clone)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.requested.store(false, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
