//! Counting semaphore (sem_*)
//!
//! The count and the number of parked waiters live under one mutex. Blocking
//! goes through the [`ParkingLot`], which drops that mutex while the thread
//! sleeps and takes it back before returning, so a post can never be missed
//! by a thread that has decided to wait.

use crate::cancel::CancelFlag;
use crate::objects::{ObjectId, ObjectTable};
use crate::park::{ParkResult, ParkingLot, WaitToken};
use crate::time::{self, Timespec};
use parking_lot::Mutex;
use std::sync::Arc;
use tr_core::SemError;

/// Largest value a semaphore can hold
pub const SEM_VALUE_MAX: u32 = u32::MAX;

/// Written to the diagnostic sink when destroy is refused
pub const BUSY_DESTROY_MSG: &str = "sem_destroy on semaphore with waiters!\n";

/// Process-private or process-shared semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemKind {
    Private,
    /// Not supported: construction fails with `PermissionDenied`
    Shared,
}

impl SemKind {
    pub fn from_pshared(pshared: bool) -> Self {
        if pshared {
            Self::Shared
        } else {
            Self::Private
        }
    }
}

pub struct Semaphore {
    id: ObjectId,
    kind: SemKind,
    token: WaitToken,
    state: Mutex<SemaphoreState>,
    parking: Arc<ParkingLot>,
}

#[derive(Debug)]
struct SemaphoreState {
    value: u32,
    waiters: u32,
    destroyed: bool,
}

impl Semaphore {
    pub fn new(
        id: ObjectId,
        kind: SemKind,
        value: u32,
        parking: Arc<ParkingLot>,
    ) -> Result<Self, SemError> {
        if kind == SemKind::Shared {
            return Err(SemError::PermissionDenied);
        }

        Ok(Self {
            id,
            kind,
            token: WaitToken::new(u64::from(id)),
            state: Mutex::new(SemaphoreState {
                value,
                waiters: 0,
                destroyed: false,
            }),
            parking,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> SemKind {
        self.kind
    }

    /// Token the waiters of this semaphore park on
    pub fn wait_token(&self) -> WaitToken {
        match self.kind {
            SemKind::Private => self.token,
            SemKind::Shared => WaitToken::SHARED,
        }
    }

    /// Decrement the count, blocking until it is positive
    pub fn wait(&self, cancel: Option<&CancelFlag>) -> Result<(), SemError> {
        self.wait_internal(false, None, cancel)
    }

    /// Decrement the count if it is positive, without blocking
    pub fn try_wait(&self) -> Result<(), SemError> {
        self.wait_internal(true, None, None)
    }

    /// Like [`Semaphore::wait`], giving up once `abstime` has passed
    pub fn timed_wait(
        &self,
        abstime: &Timespec,
        cancel: Option<&CancelFlag>,
    ) -> Result<(), SemError> {
        self.wait_internal(false, Some(abstime), cancel)
    }

    fn wait_internal(
        &self,
        try_only: bool,
        abstime: Option<&Timespec>,
        cancel: Option<&CancelFlag>,
    ) -> Result<(), SemError> {
        let token = self.wait_token();
        let mut state = self.state.lock();

        if state.destroyed {
            return Err(SemError::InvalidArgument);
        }
        if state.value > 0 {
            state.value -= 1;
            return Ok(());
        }
        if try_only {
            return Err(SemError::WouldBlock);
        }

        // A deadline only matters once we actually have to block
        let deadline = abstime.map(Timespec::to_system_time).transpose()?;

        state.waiters += 1;
        let result = loop {
            let mut outcome = match deadline.map(time::remaining_until) {
                Some(remaining) if remaining.is_zero() => ParkResult::TimedOut,
                timeout => self.parking.park(token, &mut state, timeout),
            };

            let canceled = cancel.is_some_and(CancelFlag::is_requested);
            if outcome == ParkResult::Interrupted && !canceled {
                outcome = ParkResult::Woken;
            }

            if state.value > 0 {
                state.value -= 1;
                break Ok(());
            }
            match outcome {
                ParkResult::TimedOut => break Err(SemError::TimedOut),
                ParkResult::Interrupted => break Err(SemError::Canceled),
                ParkResult::Woken => {}
            }
        };
        state.waiters -= 1;

        result
    }

    /// Increment the count and wake one waiter, if any
    ///
    /// Returns `true` if a waiter was signalled.
    pub fn post(&self) -> Result<bool, SemError> {
        let mut state = self.state.lock();

        if state.destroyed {
            return Err(SemError::InvalidArgument);
        }
        if state.value == SEM_VALUE_MAX {
            return Err(SemError::Overflow);
        }

        state.value += 1;
        if state.waiters > 0 {
            self.parking.wake_one(self.wait_token());
            return Ok(true);
        }
        Ok(false)
    }

    /// Snapshot of the current count
    pub fn value(&self) -> Result<u32, SemError> {
        let state = self.state.lock();
        if state.destroyed {
            return Err(SemError::InvalidArgument);
        }
        Ok(state.value)
    }

    /// Number of threads inside the blocking path
    pub fn waiters(&self) -> u32 {
        self.state.lock().waiters
    }

    /// Interrupt every parked waiter
    ///
    /// Waiters whose cancel flag is set give up with `Canceled`, the others
    /// go back to sleep.
    pub fn interrupt(&self) -> usize {
        let _state = self.state.lock();
        self.parking.interrupt(self.wait_token())
    }

    /// Mark the semaphore destroyed
    ///
    /// Fails with `Busy` while threads are waiting on it.
    pub fn retire(&self) -> Result<(), SemError> {
        let mut state = self.state.lock();

        if state.destroyed {
            return Err(SemError::InvalidArgument);
        }
        if state.waiters > 0 {
            return Err(SemError::Busy);
        }
        if self.kind == SemKind::Shared {
            return Err(SemError::Unimplemented);
        }

        state.destroyed = true;
        self.parking.forget(self.wait_token());
        Ok(())
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("value", &state.value)
            .field("waiters", &state.waiters)
            .finish()
    }
}

/// Semaphore entry points
///
/// Handles are ids into an [`ObjectTable`]. Destroy nulls the caller's
/// handle; every call on a null, unknown or destroyed handle fails with
/// `InvalidArgument`.
pub mod api {
    use super::*;
    use crate::objects::NULL_ID;

    /// sem_init
    pub fn sem_init(table: &ObjectTable, pshared: bool, value: u64) -> Result<ObjectId, SemError> {
        let value = u32::try_from(value).map_err(|_| SemError::InvalidArgument)?;

        let id = table.next_id()?;
        let semaphore = Semaphore::new(
            id,
            SemKind::from_pshared(pshared),
            value,
            Arc::clone(table.parking()),
        )?;
        table.register(Arc::new(semaphore));

        tracing::debug!("Created semaphore {} with value {}", id, value);
        Ok(id)
    }

    /// sem_destroy
    pub fn sem_destroy(table: &ObjectTable, semp: &mut ObjectId) -> Result<(), SemError> {
        let semaphore = table.get(*semp)?;

        if let Err(e) = semaphore.retire() {
            if e == SemError::Busy {
                tracing::warn!(
                    "Refusing to destroy semaphore {} with {} waiter(s)",
                    semaphore.id(),
                    semaphore.waiters()
                );
                if table.report_busy_destroy() {
                    table.diagnostics().write(BUSY_DESTROY_MSG);
                }
            }
            return Err(e);
        }

        table.unregister(*semp)?;
        tracing::debug!("Destroyed semaphore {}", *semp);
        *semp = NULL_ID;
        Ok(())
    }

    /// sem_wait
    pub fn sem_wait(
        table: &ObjectTable,
        sem: ObjectId,
        cancel: Option<&CancelFlag>,
    ) -> Result<(), SemError> {
        table.get(sem)?.wait(cancel)
    }

    /// sem_trywait
    pub fn sem_trywait(table: &ObjectTable, sem: ObjectId) -> Result<(), SemError> {
        table.get(sem)?.try_wait()
    }

    /// sem_timedwait
    pub fn sem_timedwait(
        table: &ObjectTable,
        sem: ObjectId,
        abstime: &Timespec,
        cancel: Option<&CancelFlag>,
    ) -> Result<(), SemError> {
        table.get(sem)?.timed_wait(abstime, cancel)
    }

    /// sem_post
    pub fn sem_post(table: &ObjectTable, sem: ObjectId) -> Result<(), SemError> {
        table.get(sem)?.post().map(|_| ())
    }

    /// sem_getvalue
    pub fn sem_getvalue(table: &ObjectTable, sem: ObjectId) -> Result<u32, SemError> {
        table.get(sem)?.value()
    }

    /// Interrupt the waiters of a semaphore (signal delivery)
    pub fn sem_interrupt(table: &ObjectTable, sem: ObjectId) -> Result<usize, SemError> {
        Ok(table.get(sem)?.interrupt())
    }
}
