//! Core runtime support for transistor-rt
//!
//! This crate provides the foundational types shared by the threading
//! library and the bootstrap: error handling, errno codes, configuration,
//! and logging infrastructure.

pub mod config;
pub mod errno;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{BootError, Result, RuntimeError, SemError};
pub use logging::{DiagnosticSink, LogBuffer, StderrSink};
