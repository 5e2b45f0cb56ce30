//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use strata_framework::gzip::DEFAULT_TYPES;
use strata_framework::params::DEFAULT_MAX_LENGTH;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StrataConfig {
    /// Subscriber settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Request supervision and the executor.
    #[serde(default)]
    pub server: ServerConfig,

    /// Response compression.
    #[serde(default)]
    pub gzip: GzipConfig,

    /// Static file serving.
    #[serde(default)]
    pub files: FilesConfig,

    /// Parameter parsing limits.
    #[serde(default)]
    pub params: ParamsConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as a filter directive fragment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Needs the `json-log` feature; falls back to `Full` without it.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Requires [`LoggingConfig::file_path`].
    File,
}

/// Rotation schedule for file output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Minutely,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file for [`LogOutput::File`].
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread IDs in each line.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in each line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target level overrides, e.g. `strata::access = "warn"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

// =============================================================================
// Server
// =============================================================================

/// Supervision and executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Default request deadline in milliseconds; `0` disables the watchdog.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Worker threads for [`block_on`](crate::StrataRuntime::block_on);
    /// `0` selects the current-thread scheduler.
    #[serde(default)]
    pub worker_threads: usize,
}

impl ServerConfig {
    /// The default deadline, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            worker_threads: 0,
        }
    }
}

fn default_timeout_ms() -> u64 {
    30000
}

// =============================================================================
// Gzip
// =============================================================================

/// Response compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GzipConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Compression level, `0..=9`.
    #[serde(default = "default_gzip_level")]
    pub level: u32,

    /// Media type fragments eligible for compression.
    #[serde(default = "default_gzip_types")]
    pub types: Vec<String>,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_gzip_level(),
            types: default_gzip_types(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_gzip_level() -> u32 {
    6
}

fn default_gzip_types() -> Vec<String> {
    DEFAULT_TYPES.iter().map(|t| t.to_string()).collect()
}

// =============================================================================
// Files
// =============================================================================

/// Static file serving; disabled while `root` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// File served for directory requests.
    #[serde(default = "default_index")]
    pub index: Option<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: None,
            index: default_index(),
        }
    }
}

fn default_index() -> Option<String> {
    Some("index.html".to_string())
}

// =============================================================================
// Params
// =============================================================================

/// Body parsing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// Largest accepted request body in bytes.
    #[serde(default = "default_max_length")]
    pub max_length: u64,

    /// Where uploaded files are stored; the system temp dir when unset.
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            upload_dir: None,
        }
    }
}

fn default_max_length() -> u64 {
    DEFAULT_MAX_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StrataConfig::default();
        assert_eq!(config.server.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.server.worker_threads, 0);
        assert!(config.gzip.enabled);
        assert_eq!(config.gzip.level, 6);
        assert_eq!(config.gzip.types.len(), DEFAULT_TYPES.len());
        assert!(config.files.root.is_none());
        assert_eq!(config.files.index.as_deref(), Some("index.html"));
        assert_eq!(config.params.max_length, DEFAULT_MAX_LENGTH);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let server = ServerConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(server.timeout(), None);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
