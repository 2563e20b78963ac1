//! # Runtime Configuration Module
//!
//! Configuration for a [`Dispatcher`](crate::Dispatcher) and the coroutines
//! its workers run on.
//!
//! ## Sources
//!
//! Configuration is assembled from, in increasing priority:
//!
//! 1. Built-in defaults ([`DispatcherConfig::default`])
//! 2. An optional YAML, TOML or JSON file ([`DispatcherConfig::from_file`])
//! 3. Environment variables ([`DispatcherConfig::apply_env`])
//!
//! ## Environment Variables
//!
//! - `BRRTP_QUEUE_CAPACITY`: admission queue capacity, `0` for hand-off (default: 1024)
//! - `BRRTP_ADMISSION_TIMEOUT_MS`: how long `make_request` may wait for room (default: 5000)
//! - `BRRTP_BACKPRESSURE_MODE`: `block` or `shed` (default: `block`)
//! - `BRRTP_STACK_SIZE`: stage coroutine stack size, decimal or `0x` hex (default: `0x10000`)
//!
//! Unparseable values are ignored with a warning and the previous value is kept.
//!
//! ## Example File
//!
//! ```yaml
//! queue_capacity: 256
//! admission_timeout_ms: 250
//! backpressure_mode: shed
//! stack_size: 32768
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Smallest coroutine stack accepted by [`DispatcherConfig::validate`]
pub const MIN_STACK_SIZE: usize = 0x1000;

/// What `make_request` does when the admission queue has no room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    /// Wait up to the admission timeout for room
    #[default]
    Block,
    /// Refuse immediately
    Shed,
}

impl FromStr for BackpressureMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "shed" => Ok(Self::Shed),
            other => Err(ConfigError::Invalid(format!(
                "unknown backpressure mode '{other}' (expected 'block' or 'shed')"
            ))),
        }
    }
}

impl fmt::Display for BackpressureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpressureMode::Block => f.write_str("block"),
            BackpressureMode::Shed => f.write_str("shed"),
        }
    }
}

/// Configuration for a dispatcher and the workers launched on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Admission queue capacity (`0` = synchronous hand-off)
    pub queue_capacity: usize,
    /// Admission timeout in milliseconds for [`BackpressureMode::Block`]
    pub admission_timeout_ms: u64,
    /// Behavior when the queue is full
    pub backpressure_mode: BackpressureMode,
    /// Stack size in bytes for every stage coroutine
    pub stack_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            admission_timeout_ms: 5_000,
            backpressure_mode: BackpressureMode::Block,
            stack_size: 0x10000, // 64KB
        }
    }
}

impl DispatcherConfig {
    /// Defaults with a specific queue capacity
    #[must_use]
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            queue_capacity,
            ..Self::default()
        }
    }

    /// Defaults overlaid with `BRRTP_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Load a configuration file; the format is chosen by extension
    /// (`.yaml`/`.yml`, `.toml`, `.json`). Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        let config: Self = match extension.as_deref() {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&raw).map_err(|e| parse_error(e.to_string()))?
            }
            Some("toml") => toml::from_str(&raw).map_err(|e| parse_error(e.to_string()))?,
            Some("json") => serde_json::from_str(&raw).map_err(|e| parse_error(e.to_string()))?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Overlay `BRRTP_*` environment variables onto this configuration
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Some(capacity) = env_value("BRRTP_QUEUE_CAPACITY", |s| s.parse().ok()) {
            self.queue_capacity = capacity;
        }
        if let Some(timeout) = env_value("BRRTP_ADMISSION_TIMEOUT_MS", |s| s.parse().ok()) {
            self.admission_timeout_ms = timeout;
        }
        if let Some(mode) = env_value("BRRTP_BACKPRESSURE_MODE", |s| s.parse().ok()) {
            self.backpressure_mode = mode;
        }
        if let Some(stack_size) = env_value("BRRTP_STACK_SIZE", parse_stack_size) {
            if stack_size < MIN_STACK_SIZE {
                warn!(
                    stack_size,
                    min_stack_size = MIN_STACK_SIZE,
                    kept = self.stack_size,
                    "Ignoring BRRTP_STACK_SIZE below minimum"
                );
            } else {
                self.stack_size = stack_size;
            }
        }
        self
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "stack_size {} is below the minimum of {MIN_STACK_SIZE} bytes",
                self.stack_size
            )));
        }
        Ok(())
    }

    /// Admission timeout as a [`Duration`]
    #[must_use]
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }
}

/// Parse a byte count written in decimal or `0x`-prefixed hex
#[must_use]
pub fn parse_stack_size(s: &str) -> Option<usize> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn env_value<T>(key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = env::var(key).ok()?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(key = key, value = %raw, "Ignoring unparseable environment variable");
    }
    parsed
}

/// Configuration loading error
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// The file could not be deserialized
    Parse {
        /// File that failed
        path: PathBuf,
        /// Deserializer message
        message: String,
    },
    /// The file extension is not one of yaml, yml, toml or json
    UnsupportedFormat {
        /// File that was rejected
        path: PathBuf,
    },
    /// A value is out of range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config file {}: {source}", path.display())
            }
            ConfigError::Parse { path, message } => {
                write!(f, "invalid config file {}: {message}", path.display())
            }
            ConfigError::UnsupportedFormat { path } => write!(
                f,
                "unsupported config format for {} (use .yaml, .yml, .toml or .json)",
                path.display()
            ),
            ConfigError::Invalid(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
