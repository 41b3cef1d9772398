//! POSIX-style threading primitives for the transistor runtime
//!
//! The semaphore is built on two primitives: a plain mutex guarding its
//! state and the [`park::ParkingLot`], which atomically releases that mutex
//! while blocking a thread on an identity token.

pub mod cancel;
pub mod objects;
pub mod park;
pub mod posix;
pub mod sync;
pub mod time;

pub use cancel::CancelFlag;
pub use objects::{ObjectId, ObjectTable, NULL_ID};
pub use park::{ParkResult, ParkingLot, WaitToken};
pub use sync::semaphore::{SemKind, Semaphore, SEM_VALUE_MAX};
pub use time::Timespec;
