//! Error types for the transistor runtime

use crate::errno;
use thiserror::Error;

/// Main error type for the runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Semaphore error: {0}")]
    Sem(#[from] SemError),

    #[error("Boot error: {0}")]
    Boot(#[from] BootError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Semaphore errors
///
/// Each variant maps onto exactly one error number, see [`SemError::errno`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemError {
    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Would block")]
    WouldBlock,

    #[error("Timed out")]
    TimedOut,

    #[error("Semaphore has waiters")]
    Busy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not implemented")]
    Unimplemented,

    #[error("Wait canceled")]
    Canceled,

    #[error("Value overflow")]
    Overflow,

    #[error("No space for another semaphore")]
    NoSpace,
}

impl SemError {
    /// Error number reported through `errno`
    pub fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => errno::EINVAL,
            Self::WouldBlock => errno::EAGAIN,
            Self::TimedOut => errno::ETIMEDOUT,
            Self::Busy => errno::EBUSY,
            Self::PermissionDenied => errno::EPERM,
            Self::Unimplemented => errno::ENOSYS,
            Self::Canceled => errno::ECANCELED,
            Self::Overflow => errno::EOVERFLOW,
            Self::NoSpace => errno::ENOSPC,
        }
    }
}

/// Bootstrap errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootError {
    #[error("Invalid context magic: 0x{0:016x}")]
    InvalidMagic(u64),

    #[error("Mismatched context version: {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Mismatched context size: 0x{found:x} (expected 0x{expected:x})")]
    SizeMismatch { found: u32, expected: u32 },

    #[error("Relocation failed: {0}")]
    Relocation(String),

    #[error("Failed to set heap size 0x{0:x}")]
    Heap(u64),
}

impl BootError {
    /// Value returned from the entry point when startup fails
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidMagic(_) | Self::VersionMismatch { .. } => -2,
            Self::SizeMismatch { .. } => -3,
            Self::Relocation(_) => -4,
            Self::Heap(_) => -5,
        }
    }
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BootError::InvalidMagic(0x1234);
        assert_eq!(format!("{}", err), "Invalid context magic: 0x0000000000001234");

        let err = BootError::SizeMismatch {
            found: 0x80,
            expected: 0x100,
        };
        assert_eq!(
            format!("{}", err),
            "Mismatched context size: 0x80 (expected 0x100)"
        );
    }

    #[test]
    fn test_error_conversion() {
        let sem_err = SemError::Busy;
        let rt_err: RuntimeError = sem_err.into();
        assert!(matches!(rt_err, RuntimeError::Sem(SemError::Busy)));
    }

    #[test]
    fn test_sem_errno_mapping() {
        assert_eq!(SemError::InvalidArgument.errno(), errno::EINVAL);
        assert_eq!(SemError::WouldBlock.errno(), errno::EAGAIN);
        assert_eq!(SemError::TimedOut.errno(), errno::ETIMEDOUT);
        assert_eq!(SemError::Busy.errno(), errno::EBUSY);
        assert_eq!(SemError::PermissionDenied.errno(), errno::EPERM);
        assert_eq!(SemError::Unimplemented.errno(), errno::ENOSYS);
        assert_eq!(SemError::Canceled.errno(), errno::ECANCELED);
        assert_eq!(SemError::Overflow.errno(), errno::EOVERFLOW);
        assert_eq!(SemError::NoSpace.errno(), errno::ENOSPC);
    }

    #[test]
    fn test_boot_exit_codes() {
        assert_eq!(BootError::InvalidMagic(0).exit_code(), -2);
        assert_eq!(
            BootError::VersionMismatch { found: 2, expected: 1 }.exit_code(),
            -2
        );
        assert_eq!(BootError::Relocation("bad".into()).exit_code(), -4);
        assert_eq!(BootError::Heap(0x400000).exit_code(), -5);
    }
}
