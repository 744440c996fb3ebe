//! Configuration loading
//!
//! Bootstrap configuration comes from a TOML file. Every field has a built-in
//! default, so a missing file (or a file with only some sections) is valid.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (applied by the binaries on top of this)
//! 2. Explicit config path (`--config` or `TONEBRIDGE_CONFIG`)
//! 3. Platform config file (`~/.config/tonebridge/config.toml`, `/etc/tonebridge/config.toml`)
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TONEBRIDGE_CONFIG";

/// Top-level TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Chunk scheduler tuning
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Audio output selection
    #[serde(default)]
    pub output: OutputSettings,

    /// HTTP ingest limits
    #[serde(default)]
    pub http: HttpSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chunk scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Nominal duration of each produced chunk in milliseconds
    ///
    /// Informational only: the scheduler always uses the decoded duration.
    #[serde(default = "default_chunk_duration_ms")]
    pub chunk_duration_ms: u64,

    /// How far ahead of the playback clock audio may be pre-scheduled (seconds)
    #[serde(default = "default_max_lookahead_secs")]
    pub max_lookahead_secs: f64,

    /// Backlog cap; the oldest queued chunk is dropped beyond this
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// Fallback drain interval when no chunk arrives (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Event channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Which audio output the service drives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// Hardware output through cpal
    #[default]
    Cpal,
    /// Headless: wall clock, buffers are accounted for but not rendered
    Null,
}

impl std::str::FromStr for OutputBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpal" => Ok(OutputBackend::Cpal),
            "null" => Ok(OutputBackend::Null),
            other => Err(Error::InvalidInput(format!(
                "Unknown output backend '{}' (expected 'cpal' or 'null')",
                other
            ))),
        }
    }
}

/// Audio output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OutputSettings {
    /// Output backend
    #[serde(default)]
    pub backend: OutputBackend,

    /// Device name (None = system default device)
    #[serde(default)]
    pub device: Option<String>,

    /// Device buffer size in frames (None = device default)
    #[serde(default)]
    pub buffer_frames: Option<u32>,
}

/// HTTP ingest settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSettings {
    /// Largest accepted chunk body in bytes
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> u16 {
    5750
}

fn default_chunk_duration_ms() -> u64 {
    500
}

fn default_max_lookahead_secs() -> f64 {
    1.5
}

fn default_max_queue_depth() -> usize {
    32
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_event_capacity() -> usize {
    256
}

fn default_max_chunk_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            scheduler: SchedulerSettings::default(),
            output: OutputSettings::default(),
            http: HttpSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            chunk_duration_ms: default_chunk_duration_ms(),
            max_lookahead_secs: default_max_lookahead_secs(),
            max_queue_depth: default_max_queue_depth(),
            poll_interval_ms: default_poll_interval_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SchedulerSettings {
    /// Nominal chunk duration
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_duration_ms)
    }

    /// Drain poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.max_lookahead_secs.is_finite() || self.max_lookahead_secs <= 0.0 {
            return Err(Error::Config(format!(
                "scheduler.max_lookahead_secs must be positive, got {}",
                self.max_lookahead_secs
            )));
        }
        if self.max_queue_depth == 0 {
            return Err(Error::Config(
                "scheduler.max_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "scheduler.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config(
                "scheduler.event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl TomlConfig {
    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve and load configuration
    ///
    /// An explicit path (argument or `TONEBRIDGE_CONFIG`) must exist. Without
    /// one, the platform config file is used when present; otherwise the
    /// built-in defaults apply.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Self::load(Path::new(&path));
            }
        }

        match default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        if self.http.max_chunk_bytes == 0 {
            return Err(Error::Config(
                "http.max_chunk_bytes must be at least 1".to_string(),
            ));
        }
        debug!("Configuration validated");
        Ok(())
    }
}

/// Platform config file, if one exists
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("tonebridge").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/tonebridge/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}
