//! Configuration using Figment
//!
//! Settings are loaded from:
//! 1. `config/id_control.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `ID_CONTROL_`, nested keys split on
//!    a double underscore, e.g. `ID_CONTROL_APPLICATION__LOG_LEVEL=debug`
//!
//! Every section has defaults, so a missing file yields a usable
//! configuration for simulation.
//!
//! # Example
//! ```no_run
//! use id_control::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Application: {}", settings.application.name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::device::{IdChannelNames, IdLimits};
use crate::error::AppResult;
use crate::transport::ChannelValue;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/id_control.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Channel registry settings
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Travel limits and tolerances of the device
    #[serde(default)]
    pub limits: IdLimits,
    /// Channel names of the channel-backed device
    #[serde(default)]
    pub channels: IdChannelNames,
    /// Values written to channels on their first connection, by channel name
    #[serde(default)]
    pub initial_values: HashMap<String, ChannelValue>,
    /// In-memory device settings
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Channel registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long to wait for critical channels to connect
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,
    /// Command mailbox capacity of the registry task
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

/// Simulation timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Time for a simulated move step to finish
    #[serde(default = "default_move_duration")]
    pub move_duration_ms: u64,
    /// Delay before simulated channels connect
    #[serde(default)]
    pub connect_delay_ms: u64,
}

fn default_name() -> String {
    "ID Control".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_ready_timeout() -> u64 {
    5000
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_move_duration() -> u64 {
    500
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl RegistryConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            move_duration_ms: default_move_duration(),
            connect_delay_ms: 0,
        }
    }
}

impl SimulationConfig {
    pub fn move_duration(&self) -> Duration {
        Duration::from_millis(self.move_duration_ms)
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}

impl Settings {
    /// Load from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and environment variables.
    ///
    /// A missing file is not an error; defaults fill every section.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ID_CONTROL_").split("__"))
            .extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.registry.ready_timeout_ms == 0 {
            return Err("registry.ready_timeout_ms must be greater than zero".to_string());
        }
        if self.registry.mailbox_capacity == 0 {
            return Err("registry.mailbox_capacity must be greater than zero".to_string());
        }

        self.limits.check().map_err(|e| e.to_string())?;

        let mut names = HashSet::new();
        for name in self.channels.all() {
            if name.trim().is_empty() {
                return Err("Channel names must not be empty".to_string());
            }
            if !names.insert(name) {
                return Err(format!("Duplicate channel name: {}", name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.registry.ready_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.application.log_level, "info");
        assert_eq!(settings.limits, IdLimits::default());
    }

    #[test]
    fn test_partial_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[limits]
min_gap = 20.0

[channels]
start = "ID:GO"

[initial_values]
"ID:GAP:SP" = 25.5
"ID:MODE" = "GAP_AND_PHASE"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.application.log_format, "pretty");
        assert_eq!(settings.limits.min_gap, 20.0);
        assert_eq!(settings.limits.max_phase_motor_position, 28.0);
        assert_eq!(settings.channels.start, "ID:GO");
        assert_eq!(
            settings.initial_values.get("ID:GAP:SP"),
            Some(&ChannelValue::Double(25.5))
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_duplicate_channel_names() {
        let mut settings = Settings::default();
        settings.channels.start = settings.channels.enabled.clone();
        let err = settings.validate().unwrap_err();
        assert!(err.contains("Duplicate channel name"));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmin_gap = \"narrow\"").unwrap();
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, crate::error::IdError::Config(_)));
    }
}
