//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! for the VisiFruit engine and its collaborators.
//!
//! # Usage
//!
//! ```rust,no_run
//! use visifruit_common::config::{ConfigError, EngineConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = EngineConfig::load_validated(Path::new("visifruit.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::consts::{CAPTURE_FPS_DEFAULT, HISTORY_SIZE_DEFAULT};
use crate::inference::InferenceConfig;
use crate::kinematics::BeltKinematicsConfig;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// or validating configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed (includes missing required fields).
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across VisiFruit services.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "visifruit-line-1"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pipeline-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Number of recent activations retained in telemetry.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Frame rate of the simulated capture source [fps].
    #[serde(default = "default_capture_fps")]
    pub capture_fps: f64,
}

fn default_history_size() -> usize {
    HISTORY_SIZE_DEFAULT
}
fn default_capture_fps() -> f64 {
    CAPTURE_FPS_DEFAULT
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_size: HISTORY_SIZE_DEFAULT,
            capture_fps: CAPTURE_FPS_DEFAULT,
        }
    }
}

impl PipelineConfig {
    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_size == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.history_size must be at least 1".to_string(),
            ));
        }
        if !self.capture_fps.is_finite() || self.capture_fps <= 0.0 || self.capture_fps > 240.0 {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.capture_fps {} out of range (0, 240]",
                self.capture_fps
            )));
        }
        Ok(())
    }
}

/// Top-level engine configuration file.
///
/// ```toml
/// [shared]
/// service_name = "visifruit-line-1"
///
/// [kinematics]
/// belt_width_m = 0.25
/// belt_speed_mps = 0.15
/// camera_position_m = 0.2
/// actuator_position_m = 0.8
///
/// [inference]
/// server_url = "http://gpu-box:9000"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Common service settings.
    pub shared: SharedConfig,
    /// Belt geometry and timing calibration.
    pub kinematics: BeltKinematicsConfig,
    /// Remote/local inference settings.
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl EngineConfig {
    /// Validate every section, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.kinematics.validate()?;
        self.inference.validate()?;
        self.pipeline.validate()
    }

    /// Load from a TOML file and validate.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid or a
///   required field is missing
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
