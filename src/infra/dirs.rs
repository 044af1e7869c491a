//! Platform-specific directory management
//!
//! Provides the location of the global settings file. Follows the XDG Base
//! Directory Specification on Linux and standard locations on macOS.
//!
//! `INDEXHOST_CONFIG_DIR` overrides the config directory.

use std::env;
use std::path::PathBuf;

/// Environment variable overriding the config directory
pub const ENV_CONFIG_DIR: &str = "INDEXHOST_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "indexhost";

/// Settings file name inside the config directory
const SETTINGS_FILE: &str = "config.toml";

/// Platform-specific directory provider for indexhost
#[derive(Debug, Clone)]
pub struct IndexhostDirs {
    config_dir: PathBuf,
}

impl IndexhostDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: Self::resolve_config_dir(),
        }
    }

    /// Use an explicit config directory
    #[must_use]
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Get the config directory path
    ///
    /// - Linux: `$XDG_CONFIG_HOME/indexhost` or `~/.config/indexhost`
    /// - macOS: `~/Library/Application Support/indexhost`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Path of the global settings file
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    fn resolve_config_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CONFIG_DIR) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                // Fallback to home directory
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }
}

impl Default for IndexhostDirs {
    fn default() -> Self {
        Self::new()
    }
}
