//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PROCFLOW_CONFIG or --config)
//! 3. Environment variables

use crate::guard::{GatewayEvaluator, MissingVariablePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway evaluation settings.
    pub engine: EngineConfig,
    /// Definitions deployed at startup.
    pub definitions: DefinitionsConfig,
}

impl Config {
    /// Loads configuration from the file named by `PROCFLOW_CONFIG` (if set),
    /// then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("PROCFLOW_CONFIG").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads configuration from `path` (defaults if `None`), applies
    /// environment variable overrides and validates the result.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let config = Self::from_file(path)?;
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.engine.apply_env_overrides();
        self.definitions.apply_env_overrides();
    }

    /// Checks settings that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.definitions.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_yaml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Renders the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Validation(e.to_string()))
    }
}

/// Gateway evaluation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reject variable snapshots that match more than one gateway branch.
    pub strict_gateways: bool,
    /// What guards see when a referenced variable is not set.
    pub missing_variables: MissingVariablePolicy,
}

impl EngineConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(strict) = std::env::var("PROCFLOW_STRICT_GATEWAYS") {
            match parse_flag(&strict) {
                Some(flag) => self.strict_gateways = flag,
                None => tracing::warn!("ignoring PROCFLOW_STRICT_GATEWAYS: '{}' is not a boolean", strict),
            }
        }

        if let Ok(policy) = std::env::var("PROCFLOW_MISSING_VARIABLES") {
            match policy.parse() {
                Ok(parsed) => self.missing_variables = parsed,
                Err(e) => tracing::warn!("ignoring PROCFLOW_MISSING_VARIABLES: {}", e),
            }
        }
    }

    /// Builds the gateway evaluator these settings describe.
    pub fn evaluator(&self) -> GatewayEvaluator {
        GatewayEvaluator::new()
            .with_strict(self.strict_gateways)
            .with_missing_variables(self.missing_variables)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Definition files deployed when the engine starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionsConfig {
    /// Definition files (`.json` is read as JSON, anything else as YAML).
    pub paths: Vec<PathBuf>,
}

impl DefinitionsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(paths) = std::env::var("PROCFLOW_DEFINITIONS") {
            self.paths = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for path in &self.paths {
            if !path.is_file() {
                return Err(ConfigError::Validation(format!(
                    "definition file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
