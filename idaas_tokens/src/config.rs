//! Static client configuration
//!
//! Configuration is read once at startup from a JSON file. The file location
//! can be overridden through the environment; otherwise it lives in the
//! user's home directory alongside the persisted credentials.

use std::{
    env, io,
    path::{Path, PathBuf},
    time::Duration,
};

use aliri_clock::DurationSecs;
use idaas_cache::StaleValueBehavior;
use serde::Deserialize;
use thiserror::Error;

use crate::{ClientId, InstanceId};

/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "IDAAS_CONFIG_PATH";

const DEFAULT_CONFIG_FILE: &str = "client-config.json";

/// The directory under the user's home holding configuration and credentials
pub const DATA_DIR_NAME: &str = ".idaas";

/// An error encountered while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("unable to read configuration at {path}")]
    Io {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// The configuration file did not parse as the expected JSON shape
    #[error("configuration at {path} is malformed")]
    Malformed {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying parse failure
        #[source]
        source: serde_json::Error,
    },

    /// A required configuration field is missing or blank
    #[error("required configuration field `{name}` is missing or blank")]
    MissingField {
        /// The offending field
        name: &'static str,
    },

    /// A configured endpoint is not a valid URL
    #[error("configured endpoint `{name}` is not a valid URL: {reason}")]
    InvalidEndpoint {
        /// The offending field
        name: &'static str,
        /// Why the URL was rejected
        reason: String,
    },

    /// No home directory is available for the default paths
    #[error("unable to determine a home directory for default paths")]
    NoHomeDir,
}

/// Static configuration for a credential-consuming client
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    /// The identity instance credentials are issued for
    pub instance_id: InstanceId,

    /// The client identifier registered with the instance
    pub client_id: ClientId,

    /// The token endpoint all grants are exchanged against
    pub token_endpoint: String,

    /// The device authorization endpoint, required only for interactive login
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,

    /// Whether credentials refresh in the background rather than inline
    #[serde(default)]
    pub async_credential_update: bool,
}

impl ClientConfig {
    /// Loads configuration from the environment-resolved path
    pub fn load() -> Result<Self, ConfigError> {
        let path = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => dirs::home_dir()
                .ok_or(ConfigError::NoHomeDir)?
                .join(DATA_DIR_NAME)
                .join(DEFAULT_CONFIG_FILE),
        };
        Self::from_path(&path)
    }

    /// Loads and validates configuration from a specific file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&data).map_err(|source| ConfigError::Malformed {
                path: path.to_owned(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_id.as_str().trim().is_empty() {
            return Err(ConfigError::MissingField {
                name: "instance_id",
            });
        }
        if self.client_id.as_str().trim().is_empty() {
            return Err(ConfigError::MissingField { name: "client_id" });
        }
        if self.token_endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField {
                name: "token_endpoint",
            });
        }
        Ok(())
    }

    /// The device authorization endpoint, which interactive login requires
    pub fn require_device_authorization_endpoint(&self) -> Result<&str, ConfigError> {
        self.device_authorization_endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.trim().is_empty())
            .ok_or(ConfigError::MissingField {
                name: "device_authorization_endpoint",
            })
    }

    /// Provider options reflecting this configuration
    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            async_credential_update: self.async_credential_update,
            ..ProviderOptions::default()
        }
    }
}

/// Tunables shared by every refreshed credential provider
#[derive(Clone, Debug)]
pub struct ProviderOptions {
    /// Whether look-ahead renewals run in the background instead of inline
    pub async_credential_update: bool,

    /// What a provider does when a renewal fails and an old value remains
    pub stale_value_behavior: StaleValueBehavior,

    /// How long a renewal waits on the refresh lock before serving stale
    pub lock_wait: Duration,

    /// Fixed offset added to every renewal deadline
    pub jitter_base: DurationSecs,

    /// Width of the random interval added on top of the jitter base
    pub jitter_spread: DurationSecs,
}

impl Default for ProviderOptions {
    /// Inline renewal, strict failure handling, a five second lock wait, and
    /// five minutes of jitter with five more minutes of spread
    fn default() -> Self {
        Self {
            async_credential_update: false,
            stale_value_behavior: StaleValueBehavior::Strict,
            lock_wait: Duration::from_secs(5),
            jitter_base: idaas_cache::jitter::DEFAULT_JITTER_BASE,
            jitter_spread: idaas_cache::jitter::DEFAULT_JITTER_SPREAD,
        }
    }
}
