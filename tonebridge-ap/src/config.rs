//! Configuration for the tonebridge-ap server
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (`--port`, `--backend`, ...)
//! 2. Environment variables (clap `env` fallbacks, `TONEBRIDGE_CONFIG`)
//! 3. TOML configuration file
//! 4. Built-in defaults

use crate::error::Result;
use std::path::PathBuf;
use tonebridge_common::config::{
    HttpSettings, OutputBackend, OutputSettings, SchedulerSettings, TomlConfig,
};

/// Values given on the command line; `None` defers to the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub backend: Option<OutputBackend>,
    pub device: Option<String>,
    pub max_lookahead_secs: Option<f64>,
    pub max_queue_depth: Option<usize>,
    pub log_level: Option<String>,
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub scheduler: SchedulerSettings,
    pub output: OutputSettings,
    pub http: HttpSettings,
    pub log_level: String,
}

impl Config {
    /// Load the TOML file (or defaults) and apply overrides
    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        let file = TomlConfig::load_or_default(overrides.config_path.as_deref())?;
        Self::from_parts(file, overrides)
    }

    /// Apply overrides to an already loaded file and validate the result
    pub fn from_parts(file: TomlConfig, overrides: &Overrides) -> Result<Self> {
        let mut scheduler = file.scheduler;
        if let Some(lookahead) = overrides.max_lookahead_secs {
            scheduler.max_lookahead_secs = lookahead;
        }
        if let Some(depth) = overrides.max_queue_depth {
            scheduler.max_queue_depth = depth;
        }
        scheduler.validate()?;

        let mut output = file.output;
        if let Some(backend) = overrides.backend {
            output.backend = backend;
        }
        if overrides.device.is_some() {
            output.device = overrides.device.clone();
        }

        Ok(Self {
            port: overrides.port.unwrap_or(file.port),
            scheduler,
            output,
            http: file.http,
            log_level: overrides
                .log_level
                .clone()
                .unwrap_or(file.logging.level),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_values_used_without_overrides() {
        let file = TomlConfig::from_toml_str(
            r#"
            port = 6000

            [scheduler]
            max_lookahead_secs = 2.0

            [output]
            backend = "null"
            "#,
        )
        .unwrap();

        let config = Config::from_parts(file, &Overrides::default()).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.scheduler.max_lookahead_secs, 2.0);
        assert_eq!(config.output.backend, OutputBackend::Null);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            port: Some(7000),
            backend: Some(OutputBackend::Null),
            device: Some("USB DAC".to_string()),
            max_queue_depth: Some(8),
            log_level: Some("trace".to_string()),
            ..Overrides::default()
        };

        let config = Config::from_parts(TomlConfig::default(), &overrides).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.output.backend, OutputBackend::Null);
        assert_eq!(config.output.device.as_deref(), Some("USB DAC"));
        assert_eq!(config.scheduler.max_queue_depth, 8);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_zero_chunk_limit_rejected_at_load() {
        // from_parts relies on the file having been validated when parsed
        let result = TomlConfig::from_toml_str("[http]\nmax_chunk_bytes = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = Overrides {
            max_lookahead_secs: Some(-1.0),
            ..Overrides::default()
        };
        assert!(Config::from_parts(TomlConfig::default(), &overrides).is_err());
    }
}
