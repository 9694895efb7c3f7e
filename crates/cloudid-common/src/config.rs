//! Configuration loading contract shared by the CloudID binaries
//!
//! Every configuration struct is layered the same way: serialized defaults,
//! then an optional TOML file, then `PREFIX_`-scoped environment variables with
//! `__` separating nested sections.

use crate::constants::APP_DIR_NAME;
use etcetera::{choose_base_strategy, BaseStrategy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to parse configuration: {details}")]
    ParseError { details: String },

    #[error("Missing required configuration value: {key}")]
    MissingValue { key: String },

    #[error("Invalid configuration value for {key}: {details}")]
    InvalidValue { key: String, details: String },

    #[error("Failed to determine base directories: {0}")]
    BaseDirectories(String),
}

/// Loads a configuration struct from its layered sources
pub trait ConfigLoader<T> {
    /// Load from the given file (or the default location) plus environment
    fn load(path: Option<PathBuf>) -> Result<T, ConfigurationError>;

    /// Load from an explicit file plus environment
    fn load_from_file(path: &Path) -> Result<T, ConfigurationError>;
}

/// Extract `T` from defaults, an optional TOML file and prefixed environment.
///
/// A missing file is not an error; figment simply contributes nothing for it.
pub fn layered<T>(defaults: &T, file: Option<&Path>, env_prefix: &str) -> Result<T, ConfigurationError>
where
    T: Serialize + DeserializeOwned,
{
    let mut figment = Figment::from(Serialized::defaults(defaults));
    if let Some(file) = file {
        figment = figment.merge(Toml::file(file));
    }
    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| ConfigurationError::ParseError {
            details: e.to_string(),
        })
}

/// Render a configuration value as a TOML template
pub fn to_toml<T: Serialize>(config: &T) -> Result<String, ConfigurationError> {
    toml::to_string_pretty(config).map_err(|e| ConfigurationError::ParseError {
        details: format!("Failed to serialize config: {e}"),
    })
}

/// Platform data directory for CloudID (e.g. `~/.local/share/cloudid` on Linux)
pub fn data_dir() -> Result<PathBuf, ConfigurationError> {
    let strategy =
        choose_base_strategy().map_err(|e| ConfigurationError::BaseDirectories(e.to_string()))?;
    Ok(strategy.data_dir().join(APP_DIR_NAME))
}

/// Platform config directory for CloudID (e.g. `~/.config/cloudid` on Linux)
pub fn config_dir() -> Result<PathBuf, ConfigurationError> {
    let strategy =
        choose_base_strategy().map_err(|e| ConfigurationError::BaseDirectories(e.to_string()))?;
    Ok(strategy.config_dir().join(APP_DIR_NAME))
}
