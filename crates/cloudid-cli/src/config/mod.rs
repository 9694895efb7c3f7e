//! Configuration management for the CloudID CLI
//!
//! Layered with figment: built-in defaults, then `config.toml` (default
//! location or `--config`), then `CLOUDID_*` environment variables, e.g.
//! `CLOUDID_AUTH__CLIENT_ID` or `CLOUDID_ENGINE__RETRY_DELAY_MS`.

use cloudid_common::config::{config_dir, data_dir, layered};
use cloudid_common::{
    ConfigLoader, ConfigurationError, CALLBACK_TIMEOUT, DEFAULT_DOMAIN, DEFAULT_LOCK_NAME,
    DEFAULT_REDIRECT_URI, LOGON_TIMEOUT, REFRESH_MARGIN, RETRY_DELAY,
};
use cloudid_sdk::{EngineOptions, Identity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CLOUDID_";

/// Configuration file name inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// CLI configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudIdConfig {
    pub auth: AuthConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
}

/// The identity tokens are acquired for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Provider host; empty falls back to the default
    pub domain: String,
    pub client_id: String,
    pub audience: String,
    /// Try silent renewal before prompting on `login`
    pub is_silent: bool,
    /// Cache sub-namespace; empty shares tokens between apps of one client id
    pub partition: String,
    /// Loopback redirect registered with the provider
    pub redirect_uri: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            client_id: String::new(),
            audience: String::new(),
            is_silent: false,
            partition: String::new(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
        }
    }
}

/// Retry and timing policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logon_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub refresh_margin_secs: u64,
    /// How long the browser sign in may take before it counts as abandoned
    pub callback_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logon_timeout_secs: LOGON_TIMEOUT.as_secs(),
            retry_delay_ms: RETRY_DELAY.as_millis() as u64,
            refresh_margin_secs: REFRESH_MARGIN.as_secs(),
            callback_timeout_secs: CALLBACK_TIMEOUT.as_secs(),
        }
    }
}

/// Where the refresh token lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file in the data directory
    #[default]
    File,
    /// OS credential store
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Overrides the platform data directory for the file backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Name of the machine-wide lock around the refresh token store
    pub lock_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: None,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn data_dir(&self) -> Result<PathBuf, ConfigurationError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }
}

impl CloudIdConfig {
    /// Default configuration file location
    pub fn default_path() -> Result<PathBuf, ConfigurationError> {
        Ok(config_dir()?.join(CONFIG_FILE))
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.auth.client_id, &self.auth.audience)
            .with_domain(&self.auth.domain)
            .with_partition(&self.auth.partition)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            logon_timeout: Duration::from_secs(self.engine.logon_timeout_secs),
            retry_delay: Duration::from_millis(self.engine.retry_delay_ms),
            refresh_margin: Duration::from_secs(self.engine.refresh_margin_secs),
            is_silent: self.auth.is_silent,
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.callback_timeout_secs)
    }

    pub fn redirect_uri(&self) -> Result<Url, ConfigurationError> {
        let url = Url::parse(&self.auth.redirect_uri).map_err(|e| {
            ConfigurationError::InvalidValue {
                key: "auth.redirect_uri".to_string(),
                details: e.to_string(),
            }
        })?;

        if url.scheme() != "http" {
            return Err(ConfigurationError::InvalidValue {
                key: "auth.redirect_uri".to_string(),
                details: "must be an http:// loopback address".to_string(),
            });
        }
        Ok(url)
    }

    /// Reject values the engine cannot work with.
    ///
    /// Missing client id or audience is left to the engine, which reports it
    /// as its own configuration failure.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.engine.logon_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "engine.logon_timeout_secs".to_string(),
                details: "must be greater than 0".to_string(),
            });
        }
        if self.engine.callback_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "engine.callback_timeout_secs".to_string(),
                details: "must be greater than 0".to_string(),
            });
        }
        if self.storage.lock_name.trim().is_empty() {
            return Err(ConfigurationError::MissingValue {
                key: "storage.lock_name".to_string(),
            });
        }
        self.redirect_uri()?;
        Ok(())
    }
}

impl ConfigLoader<CloudIdConfig> for CloudIdConfig {
    fn load(path: Option<PathBuf>) -> Result<CloudIdConfig, ConfigurationError> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        Self::load_from_file(&path)
    }

    fn load_from_file(path: &Path) -> Result<CloudIdConfig, ConfigurationError> {
        debug!("Loading configuration from: {}", path.display());
        let config = layered(&CloudIdConfig::default(), Some(path), ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }
}
