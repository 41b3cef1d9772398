//! Synchronization primitives

pub mod named;
pub mod semaphore;
