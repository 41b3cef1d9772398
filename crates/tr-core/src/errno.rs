//! Error numbers and the per-thread `errno` slot
//!
//! Values follow the newlib numbering used by the platform's C library.

use std::cell::Cell;

pub const EPERM: i32 = 1;
pub const EINTR: i32 = 4;
pub const EAGAIN: i32 = 11;
pub const EWOULDBLOCK: i32 = EAGAIN;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;
pub const ENOSPC: i32 = 28;
pub const ENOSYS: i32 = 88;
pub const ETIMEDOUT: i32 = 116;
pub const EOVERFLOW: i32 = 139;
pub const ECANCELED: i32 = 140;

thread_local! {
    static ERRNO: Cell<i32> = const { Cell::new(0) };
}

/// Get the calling thread's last error number
pub fn errno() -> i32 {
    ERRNO.with(Cell::get)
}

/// Set the calling thread's error number
pub fn set_errno(value: i32) {
    ERRNO.with(|e| e.set(value));
}
