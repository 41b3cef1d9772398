//! Named semaphores (sem_open / sem_close / sem_unlink)
//!
//! Not supported. Named semaphores would need shared-memory backed storage
//! and a wait token that is meaningful across processes, neither of which
//! exists yet. Every entry point fails with `Unimplemented` and has no side
//! effects.

use crate::objects::{ObjectId, ObjectTable};
use bitflags::bitflags;
use tr_core::SemError;

bitflags! {
    /// `oflag` bits accepted by `sem_open`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Create the semaphore if it does not exist
        const CREAT = 0x0200;
        /// Fail if it already exists (with `CREAT`)
        const EXCL  = 0x0800;
    }
}

/// sem_open
pub fn sem_open(
    _table: &ObjectTable,
    name: &str,
    flags: OpenFlags,
    _mode: u32,
    _value: u32,
) -> Result<ObjectId, SemError> {
    tracing::debug!("sem_open({:?}, {:?}) is not supported", name, flags);
    Err(SemError::Unimplemented)
}

/// sem_close
pub fn sem_close(_table: &ObjectTable, _sem: ObjectId) -> Result<(), SemError> {
    Err(SemError::Unimplemented)
}

/// sem_unlink
pub fn sem_unlink(_table: &ObjectTable, name: &str) -> Result<(), SemError> {
    tracing::debug!("sem_unlink({:?}) is not supported", name);
    Err(SemError::Unimplemented)
}
