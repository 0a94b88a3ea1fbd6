//! Service configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bbq_core::{PipelineMetrics, ThermometerOptions};
use serde::{Deserialize, Serialize};

/// Largest accepted per-observer buffer.
pub const MAX_OBSERVER_BUFFER: usize = 1024;

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Thermometer settings.
    pub sensor: SensorConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every field error.
    ///
    /// # Example
    ///
    /// ```
    /// use bbq_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.sensor.validate());
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Thermometer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Advertised device name to look for.
    pub name: String,
    /// Deadline for each remote call, in seconds.
    pub call_timeout_secs: u64,
    /// Discovery attempts while waiting for the GATT services.
    pub resolve_attempts: u32,
    /// Delay between discovery attempts, in milliseconds.
    pub resolve_interval_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            name: "BBQ".to_string(),
            call_timeout_secs: 10,
            resolve_attempts: 10,
            resolve_interval_ms: 500,
        }
    }
}

impl SensorConfig {
    /// Validate sensor configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(ValidationError::new("sensor.name", "device name cannot be empty"));
        }
        if self.call_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "sensor.call_timeout_secs",
                "call timeout must be at least 1 second",
            ));
        }
        if self.resolve_attempts == 0 {
            errors.push(ValidationError::new(
                "sensor.resolve_attempts",
                "at least one discovery attempt is required",
            ));
        }

        errors
    }

    /// Session options for this sensor, counting into `metrics`.
    pub fn thermometer_options(&self, metrics: Arc<PipelineMetrics>) -> ThermometerOptions {
        ThermometerOptions::default()
            .call_timeout(Duration::from_secs(self.call_timeout_secs))
            .resolve(
                self.resolve_attempts,
                Duration::from_millis(self.resolve_interval_ms),
            )
            .metrics(metrics)
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:9000").
    pub bind: String,
    /// Measurements buffered per WebSocket viewer before it is skipped.
    pub observer_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9000".to_string(),
            observer_buffer: 1,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new("server.bind", "bind address cannot be empty"));
        } else {
            match self.bind.parse::<SocketAddr>() {
                Ok(addr) if addr.port() == 0 => {
                    errors.push(ValidationError::new("server.bind", "port cannot be 0"));
                }
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!(
                        "invalid bind address '{}': expected format 'ip:port'",
                        self.bind
                    ),
                )),
            }
        }

        if self.observer_buffer == 0 || self.observer_buffer > MAX_OBSERVER_BUFFER {
            errors.push(ValidationError::new(
                "server.observer_buffer",
                format!("must be between 1 and {MAX_OBSERVER_BUFFER}"),
            ));
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Whether measurements are persisted at all.
    pub enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: bbq_store::default_db_path(),
            enabled: true,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.enabled && self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bbq")
        .join("service.toml")
}
