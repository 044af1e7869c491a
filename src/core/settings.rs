//! Global settings management
//!
//! Reads defaults for build runs from `config.toml` in the config directory.
//! Command-line switches take precedence over everything stored here.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::infra::dirs::IndexhostDirs;

/// Global settings for indexhost
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Default build run options
    #[serde(default)]
    pub build: BuildSettings,

    /// Output preferences
    #[serde(default)]
    pub output: OutputSettings,
}

/// Default build run options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSettings {
    /// Worker bound: an integer or `"cpu"`
    pub max_workers: Option<MaxWorkersSetting>,

    /// Run jobs concurrently
    pub use_concurrency: Option<bool>,

    /// Show an aggregate progress estimate
    pub estimate_progress: Option<bool>,

    /// Seconds a builder may spend disposing before it is abandoned
    pub dispose_grace_secs: Option<u64>,
}

/// Output preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputSettings {
    /// Suppress all progress and summary output
    pub silent: Option<bool>,

    /// Exit as soon as the run is finished
    pub auto_close: Option<bool>,
}

/// `max_workers` as written in the settings file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MaxWorkersSetting {
    Count(u64),
    Token(String),
}

impl fmt::Display for MaxWorkersSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count}"),
            Self::Token(token) => f.write_str(token),
        }
    }
}

impl Settings {
    /// Load settings from the config directory
    ///
    /// A missing file yields the defaults; an invalid one is an error.
    pub fn load(dirs: &IndexhostDirs) -> Result<Self, SettingsError> {
        Self::load_from_path(&dirs.settings_path())
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| SettingsError::Parse {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }
}
