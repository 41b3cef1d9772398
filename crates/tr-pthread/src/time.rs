//! Absolute deadlines (`struct timespec`)

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tr_core::SemError;

/// Nanoseconds per second
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Realtime clock instant, seconds and nanoseconds since the UNIX epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl Timespec {
    pub const fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        Self { tv_sec, tv_nsec }
    }

    /// Current realtime clock value
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Deadline `duration` from now
    pub fn after(duration: Duration) -> Self {
        Self::from_system_time(SystemTime::now() + duration)
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            tv_sec: since_epoch.as_secs() as i64,
            tv_nsec: i64::from(since_epoch.subsec_nanos()),
        }
    }

    /// `true` if the fields describe a valid instant
    pub fn is_valid(&self) -> bool {
        self.tv_sec >= 0 && (0..NSEC_PER_SEC).contains(&self.tv_nsec)
    }

    /// Convert to a `SystemTime`, rejecting malformed values
    pub fn to_system_time(&self) -> Result<SystemTime, SemError> {
        if !self.is_valid() {
            return Err(SemError::InvalidArgument);
        }
        let offset = Duration::new(self.tv_sec as u64, self.tv_nsec as u32);
        UNIX_EPOCH
            .checked_add(offset)
            .ok_or(SemError::InvalidArgument)
    }
}

/// Time left until `deadline`, zero once it has passed
pub fn remaining_until(deadline: SystemTime) -> Duration {
    deadline
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO)
}
