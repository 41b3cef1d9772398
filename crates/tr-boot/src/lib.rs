//! Bootstrap for transistor-rt
//!
//! Everything that has to happen before `main` runs: applying the module's
//! own relative relocations, checking the context handed over by the
//! loader, and setting up heap and stdio when there is no loader.

pub mod context;
pub mod reloc;
pub mod startup;

pub use context::{ExecutionContext, RawContext, CONTEXT_MAGIC, CONTEXT_SIZE, CONTEXT_VERSION};
pub use reloc::{relocate, ImageBuilder};
pub use startup::{start, HostPlatform, Image, Platform, StdioKind};
