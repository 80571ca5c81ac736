//! Configuration Management
//!
//! This module loads and saves Procheck settings.
//!
//! # Configuration Locations
//! - Local: `.procheck/config.json` (per project, team-shareable)
//! - Global: `~/.config/procheck/config.json` (per user)
//!
//! # Resolution Precedence
//! 1. Local config file (`.procheck/config.json`)
//! 2. Global config file (`~/.config/procheck/config.json`)
//! 3. Built-in defaults
//!
//! Settings are merged field by field: a field set locally overrides the
//! global value, unset local fields fall through to the global file.
//!
//! Connections themselves are NOT stored here. They live in the local store
//! (see [`crate::store`]) with their passwords encrypted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProcheckError, Result};

/// Environment variable consulted for the age identity unless overridden
pub const DEFAULT_IDENTITY_ENV: &str = "PROCHECK_IDENTITY";

/// Store file name inside the data directory
pub const STORE_FILE_NAME: &str = "procheck.db";

/// Identity file name inside the data directory
pub const IDENTITY_FILE_NAME: &str = "identity.txt";

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Base level (`error`, `warn`, `info`, `debug`, `trace`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// `compact` (default) or `json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Procheck settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the store and the default identity file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Age identity file used to encrypt stored passwords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,

    /// Environment variable that may carry the age identity (CI/headless)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_env: Option<String>,

    /// Deadline for a whole evaluation run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_timeout_ms: Option<u64>,

    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Settings rooted at an explicit data directory (tests, `--data-dir`)
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: Some(data_dir.into()), ..Self::default() }
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }

        dirs::data_dir()
            .map(|d| d.join("procheck"))
            .ok_or_else(|| ProcheckError::config_error("Could not determine user data directory"))
    }

    /// Path of the local store database
    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(STORE_FILE_NAME))
    }

    /// Path of the age identity file
    pub fn identity_path(&self) -> Result<PathBuf> {
        match &self.identity_file {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join(IDENTITY_FILE_NAME)),
        }
    }

    /// Name of the identity environment variable
    #[must_use]
    pub fn identity_env(&self) -> &str {
        self.identity_env.as_deref().unwrap_or(DEFAULT_IDENTITY_ENV)
    }

    /// Overlay `other` on top of `self` (fields set in `other` win)
    #[must_use]
    pub fn merged_with(self, other: Self) -> Self {
        Self {
            data_dir: other.data_dir.or(self.data_dir),
            identity_file: other.identity_file.or(self.identity_file),
            identity_env: other.identity_env.or(self.identity_env),
            evaluation_timeout_ms: other.evaluation_timeout_ms.or(self.evaluation_timeout_ms),
            log: LogSettings {
                level: other.log.level.or(self.log.level),
                format: other.log.format.or(self.log.format),
            },
        }
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.procheck/config.json`
    Local,
    /// Global config: `~/.config/procheck/config.json`
    Global,
}

impl std::str::FromStr for ConfigLocation {
    type Err = ProcheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "global" => Ok(Self::Global),
            other => Err(ProcheckError::invalid_input(format!(
                "Unknown config location '{other}' (expected local or global)"
            ))),
        }
    }
}

/// Get path to local config file (`.procheck/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        ProcheckError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".procheck").join("config.json"))
}

/// Get path to global config file (`~/.config/procheck/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ProcheckError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("procheck").join("config.json"))
}

/// Path for a given location
pub fn config_path(location: ConfigLocation) -> Result<PathBuf> {
    match location {
        ConfigLocation::Local => local_config_path(),
        ConfigLocation::Global => global_config_path(),
    }
}

/// Load settings from a config file; a missing file yields defaults
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| ProcheckError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str(&contents)
        .map_err(|e| ProcheckError::config_error(format!("Invalid config file format: {e}")))
}

/// Save settings to a config file, creating parent directories
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ProcheckError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(settings)
        .map_err(|e| ProcheckError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| ProcheckError::config_error(format!("Could not write config file: {e}")))
}

/// Load settings with precedence (local over global over defaults)
pub fn load_with_precedence() -> Result<Settings> {
    let global = load_settings(&global_config_path()?)?;
    let local = load_settings(&local_config_path()?)?;
    Ok(global.merged_with(local))
}
