//! Park/wake primitive keyed by identity token
//!
//! A thread parks on a [`WaitToken`] while holding the lock that guards the
//! state it is waiting on. Parking releases that lock atomically and
//! reacquires it before returning, so a wake issued under the same lock can
//! never slip in between the waiter's decision to block and the block
//! itself.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identity token addressing a group of parked threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitToken(u64);

impl WaitToken {
    /// Token shared by every process-shared object
    pub const SHARED: WaitToken = WaitToken(u64::MAX);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Why a parked thread returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkResult {
    /// Woken by a wake call, or spuriously
    Woken,
    /// The timeout elapsed
    TimedOut,
    /// Interrupted via [`ParkingLot::interrupt`]
    Interrupted,
}

#[derive(Default)]
struct WaitQueue {
    condvar: Condvar,
    parked: AtomicUsize,
    /// Bumped on every interrupt
    interrupts: AtomicU64,
}

/// Table of wait queues, one per live token
///
/// Every wait queue is only ever used together with a single mutex: the one
/// guarding the object the token identifies. All wake and interrupt calls
/// for a token must be made while holding that mutex.
#[derive(Default)]
pub struct ParkingLot {
    queues: Mutex<HashMap<WaitToken, Arc<WaitQueue>>>,
}

impl ParkingLot {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, token: WaitToken) -> Arc<WaitQueue> {
        Arc::clone(self.queues.lock().entry(token).or_default())
    }

    fn existing(&self, token: WaitToken) -> Option<Arc<WaitQueue>> {
        self.queues.lock().get(&token).cloned()
    }

    /// Release `guard`'s lock and block on `token`
    ///
    /// Returns with the lock held again. `None` waits without a timeout.
    pub fn park<T>(
        &self,
        token: WaitToken,
        guard: &mut MutexGuard<'_, T>,
        timeout: Option<Duration>,
    ) -> ParkResult {
        let queue = self.queue(token);
        let seen = queue.interrupts.load(Ordering::Acquire);

        queue.parked.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Parking on token {:#x} (timeout {:?})", token.raw(), timeout);

        let timed_out = match timeout {
            Some(duration) => queue.condvar.wait_for(guard, duration).timed_out(),
            None => {
                queue.condvar.wait(guard);
                false
            }
        };

        queue.parked.fetch_sub(1, Ordering::Relaxed);

        if queue.interrupts.load(Ordering::Acquire) != seen {
            ParkResult::Interrupted
        } else if timed_out {
            ParkResult::TimedOut
        } else {
            ParkResult::Woken
        }
    }

    /// Wake one thread parked on `token`
    ///
    /// Returns `true` if a thread was woken.
    pub fn wake_one(&self, token: WaitToken) -> bool {
        let woke = self
            .existing(token)
            .is_some_and(|queue| queue.condvar.notify_one());
        tracing::trace!("Wake one on token {:#x}: {}", token.raw(), woke);
        woke
    }

    /// Make every thread parked on `token` return [`ParkResult::Interrupted`]
    ///
    /// Returns the number of threads woken.
    pub fn interrupt(&self, token: WaitToken) -> usize {
        let Some(queue) = self.existing(token) else {
            return 0;
        };
        queue.interrupts.fetch_add(1, Ordering::Release);
        let woken = queue.condvar.notify_all();
        tracing::trace!("Interrupted {} thread(s) on token {:#x}", woken, token.raw());
        woken
    }

    /// Number of threads currently parked on `token`
    pub fn parked(&self, token: WaitToken) -> usize {
        self.existing(token)
            .map_or(0, |queue| queue.parked.load(Ordering::Relaxed))
    }

    /// Drop the wait queue of a retired token
    ///
    /// The queue is kept if a thread is still parked on it.
    pub fn forget(&self, token: WaitToken) {
        let mut queues = self.queues.lock();
        if queues
            .get(&token)
            .is_some_and(|queue| queue.parked.load(Ordering::Relaxed) == 0)
        {
            queues.remove(&token);
        }
    }

    /// Number of tokens with a wait queue
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }
}
