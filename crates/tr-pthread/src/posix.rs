//! C-style semaphore interface
//!
//! Mirrors `<semaphore.h>`: calls return `0` on success and `-1` on failure
//! with the reason stored in the thread's `errno`. All semaphores created
//! here live in one process-wide [`ObjectTable`].

#![allow(non_camel_case_types)]

use crate::cancel::CancelFlag;
use crate::objects::{ObjectId, ObjectTable};
use crate::sync::named::{self, OpenFlags};
use crate::sync::semaphore::api;
use crate::time::Timespec;
use once_cell::sync::Lazy;
use tr_core::errno::{set_errno, EINVAL};
use tr_core::SemError;

/// Semaphore handle as seen by C code
pub type sem_t = ObjectId;

static SEMAPHORES: Lazy<ObjectTable> = Lazy::new(ObjectTable::new);

/// The process-wide semaphore table
pub fn table() -> &'static ObjectTable {
    &SEMAPHORES
}

fn status(result: Result<(), SemError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_errno(e.errno());
            -1
        }
    }
}

fn invalid() -> i32 {
    set_errno(EINVAL);
    -1
}

pub fn sem_init(semp: Option<&mut sem_t>, pshared: i32, value: u64) -> i32 {
    let Some(semp) = semp else {
        return invalid();
    };
    status(api::sem_init(table(), pshared != 0, value).map(|id| *semp = id))
}

pub fn sem_destroy(semp: Option<&mut sem_t>) -> i32 {
    match semp {
        Some(semp) => status(api::sem_destroy(table(), semp)),
        None => invalid(),
    }
}

/// Stores the count in `sval`; a count that does not fit an `int` fails
/// with `EOVERFLOW` and leaves `sval` untouched
pub fn sem_getvalue(semp: Option<&sem_t>, sval: &mut i32) -> i32 {
    let Some(&sem) = semp else {
        return invalid();
    };
    let result = api::sem_getvalue(table(), sem).and_then(|value| {
        *sval = i32::try_from(value).map_err(|_| SemError::Overflow)?;
        Ok(())
    });
    status(result)
}

pub fn sem_post(semp: Option<&sem_t>) -> i32 {
    match semp {
        Some(&sem) => status(api::sem_post(table(), sem)),
        None => invalid(),
    }
}

/// Blocks until the count is positive; honors the calling thread's
/// cancellation flag when interrupted
pub fn sem_wait(semp: Option<&sem_t>) -> i32 {
    let Some(&sem) = semp else {
        return invalid();
    };
    let cancel = CancelFlag::current();
    status(api::sem_wait(table(), sem, Some(&cancel)))
}

pub fn sem_trywait(semp: Option<&sem_t>) -> i32 {
    match semp {
        Some(&sem) => status(api::sem_trywait(table(), sem)),
        None => invalid(),
    }
}

pub fn sem_timedwait(semp: Option<&sem_t>, abstime: Option<&Timespec>) -> i32 {
    let (Some(&sem), Some(abstime)) = (semp, abstime) else {
        return invalid();
    };
    let cancel = CancelFlag::current();
    status(api::sem_timedwait(table(), sem, abstime, Some(&cancel)))
}

/// Always fails; `None` stands for `SEM_FAILED`
pub fn sem_open(name: &str, oflag: OpenFlags, mode: u32, value: u32) -> Option<sem_t> {
    match named::sem_open(table(), name, oflag, mode, value) {
        Ok(id) => Some(id),
        Err(e) => {
            set_errno(e.errno());
            None
        }
    }
}

pub fn sem_close(semp: Option<&sem_t>) -> i32 {
    status(named::sem_close(table(), semp.copied().unwrap_or_default()))
}

pub fn sem_unlink(name: &str) -> i32 {
    status(named::sem_unlink(table(), name))
}
