//! Configuration management for Tao.
//!
//! Everything protocol-related lives in the remote tree; the local
//! configuration only covers how this endpoint logs in and its defaults.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/tao/config.toml` |
//! | macOS | `~/Library/Application Support/io.Tao.Tao/config.toml` |
//! | Windows | `%APPDATA%\Tao\Tao\config\config.toml` |
//!
//! ## Example
//!
//! ```toml
//! [identity]
//! name = "synth"
//! url = "https://tao.example.io"
//! id = "abcdefghij0123456789"
//!
//! [channels]
//! default_data_format = "midi"
//!
//! [status]
//! log_enabled = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::Identity;

/// Main configuration struct for Tao.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Login triple
    pub identity: IdentityConfig,
    /// Channel defaults
    pub channels: ChannelDefaults,
    /// Status reporting
    pub status: StatusConfig,
}

/// Login triple, any part of which may be missing from the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name
    pub name: Option<String>,
    /// Store URL
    pub url: Option<String>,
    /// Device id
    pub id: Option<String>,
}

/// Channel defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelDefaults {
    /// Data format used when a channel does not name one
    pub default_data_format: String,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            default_data_format: crate::DEFAULT_DATA_FORMAT.to_string(),
        }
    }
}

/// Status reporting settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Append every status to the module's status log
    pub log_enabled: bool,
    /// Description written for unmapped status codes
    pub unknown_description: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            log_enabled: true,
            unknown_description: crate::UNKNOWN_STATUS_DESCRIPTION.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "Tao", "Tao")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Build and validate the configured identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when a field is missing and
    /// [`Error::InvalidIdentity`] when one is malformed.
    pub fn identity(&self) -> Result<Identity> {
        let field = |value: &Option<String>, key: &str| {
            value
                .clone()
                .ok_or_else(|| Error::ConfigError(format!("identity.{key} is not set")))
        };

        let identity = Identity::new(
            field(&self.identity.name, "name")?,
            field(&self.identity.url, "url")?,
            field(&self.identity.id, "id")?,
        );
        identity.validate()?;
        Ok(identity)
    }
}
