//! Configuration for the decode engine and its dispatch layer

use crate::{sampling::SamplingConfig, CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Environment variable selecting the generation backend
pub const BACKEND_ENV: &str = "SPINDLE_BACKEND";

/// Environment variable overriding the log level
pub const LOG_LEVEL_ENV: &str = "SPINDLE_LOG_LEVEL";

/// Main configuration for the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Preferred generation backend; resolved at dispatch time when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,

    /// Model-level sampling defaults
    pub sampling: SamplingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Generation backends a dispatcher can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External engine that batches many requests
    Batched,
    /// The in-process [`DecodeEngine`](crate::DecodeEngine)
    Direct,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batched => "batched",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batched" => Ok(Self::Batched),
            "direct" => Ok(Self::Direct),
            other => Err(CoreError::invalid_parameter(
                "INVALID_BACKEND",
                format!("Unknown backend '{}'", other),
                "Backend selection",
                "Use 'batched' or 'direct'",
                "backend",
                other,
                "batched | direct",
            )),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,

    /// Multi-line human readable output instead of compact lines
    pub pretty: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            pretty: false,
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(CoreError::invalid_parameter(
                "INVALID_LOG_LEVEL",
                format!("Unknown log level '{}'", other),
                "Logging configuration",
                "Use one of trace, debug, info, warn, error",
                "level",
                other,
                "trace | debug | info | warn | error",
            )),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::configuration_with_path(
                "CONFIG_READ_ERROR",
                format!("Failed to read config file: {}", e),
                "Engine configuration loading",
                "Check file path and permissions",
                path,
            )
        })?;

        toml::from_str(&content).map_err(|e| {
            CoreError::configuration_with_path(
                "CONFIG_PARSE_ERROR",
                format!("Failed to parse config file: {}", e),
                "Engine configuration loading",
                "Check TOML syntax and field names",
                path,
            )
        })
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            CoreError::configuration_with_path(
                "CONFIG_SERIALIZE_ERROR",
                format!("Failed to serialize config: {}", e),
                "Engine configuration saving",
                "Check configuration values",
                path,
            )
        })?;
        std::fs::write(path, content).map_err(|e| {
            CoreError::configuration_with_path(
                "CONFIG_WRITE_ERROR",
                format!("Failed to write config file: {}", e),
                "Engine configuration saving",
                "Check directory permissions",
                path,
            )
        })
    }

    /// Load from an optional file, then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SPINDLE_BACKEND` and `SPINDLE_LOG_LEVEL` from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup; empty values are ignored.
    ///
    /// A backend set in the configuration itself is kept; the variable only
    /// fills in a missing one.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.backend.is_none() {
            if let Some(value) = lookup(BACKEND_ENV) {
                self.backend = Some(value.parse()?);
            }
        }
        if let Some(value) = lookup(LOG_LEVEL_ENV) {
            self.logging.level = value.parse()?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()
    }
}
