//! Logging setup and the diagnostic text sink
//!
//! Structured logging goes through `tracing`. Separately, a few runtime paths
//! emit raw diagnostic text (the equivalent of writing to fd 2); those go
//! through a [`DiagnosticSink`] so the bootstrap can route them to the
//! loader-visible log buffer.

use crate::config::DebugConfig;
use crate::error::RuntimeError;
use parking_lot::Mutex;
use std::io::Write;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a
/// subscriber is already installed or the log file can't be created.
pub fn init(config: &DebugConfig) -> Result<(), RuntimeError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));

    let result = if config.log_to_file {
        let file = std::fs::File::create(&config.log_path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| RuntimeError::Logging(e.to_string()))
}

/// Destination for raw diagnostic text
pub trait DiagnosticSink: Send + Sync {
    fn write(&self, text: &str);
}

/// Writes diagnostics to the process' standard error
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn write(&self, text: &str) {
        // Diagnostics are best effort
        let _ = std::io::stderr().write_all(text.as_bytes());
    }
}

/// Bounded in-memory log buffer
///
/// Text past the capacity is dropped; the buffer never reallocates.
#[derive(Debug)]
pub struct LogBuffer {
    data: Mutex<Vec<u8>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Number of bytes currently stored
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the stored text
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.data.lock()).into_owned()
    }

    pub fn clear(&self) {
        self.data.lock().clear();
    }
}

impl DiagnosticSink for LogBuffer {
    fn write(&self, text: &str) {
        let mut data = self.data.lock();
        let room = self.capacity - data.len();
        let bytes = text.as_bytes();
        data.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_append() {
        let buffer = LogBuffer::new(64);
        assert!(buffer.is_empty());

        buffer.write("hello ");
        buffer.write("world");
        assert_eq!(buffer.contents(), "hello world");
        assert_eq!(buffer.len(), 11);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_log_buffer_truncates_at_capacity() {
        let buffer = LogBuffer::new(8);
        buffer.write("0123456");
        buffer.write("789");
        assert_eq!(buffer.contents(), "01234567");

        // Full buffer drops everything
        buffer.write("x");
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_sinks_as_trait_objects() {
        let sinks: Vec<Box<dyn DiagnosticSink>> =
            vec![Box::new(StderrSink), Box::new(LogBuffer::new(16))];
        for sink in &sinks {
            sink.write("");
        }
    }
}
