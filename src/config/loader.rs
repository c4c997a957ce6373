// src/config/loader.rs
//! Configuration loader: defaults, then an optional TOML file, then environment

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{constants::paths, SystemConfig};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("configuration parse error: {0}")]
    Parse(String),

    #[error("configuration validation errors:\n  {}", .0.join("\n  "))]
    Validation(Vec<String>),

    #[error("configuration serialization error: {0}")]
    Serialize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::Serialize(err.to_string())
    }
}

/// Layered configuration loader.
///
/// Sources are merged in order: built-in defaults, the first TOML file found
/// among the candidate paths, then `MI__SECTION__KEY` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    use_environment: bool,
    require_file: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader that looks for `mi-core.toml` in the working directory
    pub fn new() -> Self {
        Self {
            config_paths: vec![PathBuf::from(paths::DEFAULT_CONFIG_FILE)],
            use_environment: true,
            require_file: false,
        }
    }

    /// Loader for one explicit file, which must exist
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            config_paths: vec![path.into()],
            use_environment: true,
            require_file: true,
        }
    }

    /// Disable environment overrides (useful in tests)
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    /// Load, merge and validate the system configuration
    pub fn load(&self) -> Result<SystemConfig, ConfigError> {
        let defaults = config::Config::try_from(&SystemConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        match self.config_paths.iter().find(|p| p.exists()) {
            Some(path) => {
                info!(path = %path.display(), "loading configuration file");
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            None if self.require_file => {
                let shown = self
                    .config_paths
                    .first()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                return Err(ConfigError::FileNotFound(shown));
            }
            None => debug!("no configuration file found, using defaults"),
        }

        if self.use_environment {
            builder = builder.add_source(
                config::Environment::with_prefix(paths::ENV_PREFIX)
                    .prefix_separator(paths::ENV_SEPARATOR)
                    .separator(paths::ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let config: SystemConfig = builder.build()?.try_deserialize()?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Write a configuration to disk as TOML
    pub fn save(config: &SystemConfig, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(config)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, text)?;
        Ok(())
    }
}
