//! Configuration system for the transistor runtime

use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub boot: BootConfig,
    pub sync: SyncConfig,
    pub debug: DebugConfig,
}

/// Startup settings used when no loader context is supplied
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Heap requested from the kernel when running contextless
    pub heap_size: u64,
    /// Optional stdout server (`host:port`); empty disables it
    pub stdout_server: String,
    /// Tear down the network session after `main` returns
    pub finalize_bsd: bool,
}

/// Synchronization primitive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of the in-memory diagnostic buffer
    pub diag_buffer_size: usize,
    /// Write a diagnostic line when destroy is refused because of waiters
    pub report_busy_destroy: bool,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Heap size used when the loader does not hand over a context
pub const DEFAULT_NOCONTEXT_HEAP_SIZE: u64 = 0x40_0000;

/// Size of the loader-visible log buffer
pub const DEFAULT_LOG_BUFFER_SIZE: usize = 0x2_0000;

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_NOCONTEXT_HEAP_SIZE,
            stdout_server: String::new(),
            finalize_bsd: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            diag_buffer_size: DEFAULT_LOG_BUFFER_SIZE,
            report_busy_destroy: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_to_file: false,
            log_path: PathBuf::from("transistor-rt.log"),
        }
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, RuntimeError> {
        let path = Self::config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Self::from_toml_str(&content)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, RuntimeError> {
        toml::from_str(content).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), RuntimeError> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| RuntimeError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("transistor-rt")
            .join("config.toml")
    }
}
